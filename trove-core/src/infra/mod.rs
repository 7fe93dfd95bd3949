//! Coordination store adapters.

pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory_store::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisCoordinationStore;
