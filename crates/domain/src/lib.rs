pub mod entities;
pub mod keys;
pub mod ports;
pub mod value_objects;

pub use entities::*;
pub use fleet_errors::{FleetError, FleetResult};
pub use ports::*;
pub use value_objects::*;
