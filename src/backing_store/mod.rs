//! # Backing Store
//!
//! The shared network key-value service used as the L2 tier, behind the
//! [`BackingStore`] driver trait, plus the [`BackingStoreConnection`] manager
//! that keeps one logical connection healthy.
//!
//! ## Drivers
//!
//! - [`RedisStore`]: Redis via `redis::aio::ConnectionManager` (feature `redis-store`)
//! - [`InMemoryStore`]: in-process store with failure injection, for tests and development

pub mod connection;
pub mod providers;
pub mod traits;

pub use connection::{
    BackingStoreConnection, ConnectionCallback, ConnectionEvent, ConnectionEventKind,
    ConnectionState, ConnectionStats, ErrorCallback, ErrorEvent,
};
#[cfg(feature = "redis-store")]
pub use providers::RedisStore;
pub use providers::{InMemoryStore, StoreCallCounts};
pub use traits::BackingStore;
