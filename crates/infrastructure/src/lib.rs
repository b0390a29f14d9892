pub mod in_memory_store;
pub mod redis_store;

pub use in_memory_store::InMemoryCoordinationStore;
pub use redis_store::{RedisConnectionManager, RedisCoordinationStore};
