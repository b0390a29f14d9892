pub mod app_config;
pub mod cluster;
pub mod jobs;
pub mod observability;
pub mod queue;
pub mod redis;

pub use app_config::*;
pub use cluster::*;
pub use jobs::*;
pub use observability::*;
pub use queue::*;
pub use redis::*;
