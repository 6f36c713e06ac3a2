//! Backing store driver trait

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Network key-value service used as the shared L2 tier
///
/// Implemented by concrete drivers (Redis, in-memory). Values are opaque
/// bytes; encoding lives in `crate::cache::codec`. Drivers must be safe for
/// concurrent use since the health loop and request path share one instance.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Establish the underlying connection (or pool)
    async fn connect(&self) -> CacheResult<()>;

    /// Release the underlying connection. Idempotent.
    async fn disconnect(&self) -> CacheResult<()>;

    /// Round-trip liveness probe
    async fn ping(&self) -> CacheResult<()>;

    /// Get a value by key
    ///
    /// Returns `Ok(Some(bytes))` on hit, `Ok(None)` on miss.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Get a value together with its remaining TTL
    ///
    /// The TTL is `None` when the key never expires.
    async fn get_with_ttl(&self, key: &str) -> CacheResult<Option<(Vec<u8>, Option<Duration>)>>;

    /// Set a value with a TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Update the TTL of an existing key, returning whether it existed
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remove every key in the selected database
    async fn flush_all(&self) -> CacheResult<()>;

    /// Get the name of the driver
    fn provider_name(&self) -> &'static str;
}
