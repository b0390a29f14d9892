pub mod connection_manager;
pub mod store;

pub use connection_manager::RedisConnectionManager;
pub use store::RedisCoordinationStore;
