//! Backing store drivers

pub mod in_memory;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use in_memory::{InMemoryStore, StoreCallCounts};
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
