pub mod collaborators;
pub mod coordination;

pub use collaborators::*;
pub use coordination::*;
