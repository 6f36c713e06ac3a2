//! Redis backing store driver
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections.
//! Requires the `redis-store` feature flag.

use crate::backing_store::traits::BackingStore;
use crate::config::{BackingStoreConfig, ConfigurationError};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

/// Redis-backed store using a shared ConnectionManager
///
/// The client is built eagerly so a malformed address fails at construction;
/// the network connection is only opened by [`BackingStore::connect`].
pub struct RedisStore {
    client: redis::Client,
    redacted_url: String,
    connection: RwLock<Option<ConnectionManager>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.redacted_url)
            .field("connected", &self.connection.read().is_some())
            .finish()
    }
}

impl RedisStore {
    /// Create a Redis store from configuration
    pub fn from_config(config: &BackingStoreConfig) -> Result<Self, ConfigurationError> {
        let redacted_url = config.redacted_url();
        let client = redis::Client::open(config.connection_url().as_str())
            .map_err(|e| ConfigurationError::invalid_address(redacted_url.clone(), e))?;

        Ok(Self {
            client,
            redacted_url,
            connection: RwLock::new(None),
        })
    }

    fn connection(&self) -> CacheResult<ConnectionManager> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| CacheError::NotConnected {
                state: "no redis connection".to_string(),
            })
    }
}

fn backend_error(command: &str, error: redis::RedisError) -> CacheError {
    if error.is_timeout()
        || error.is_io_error()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
    {
        CacheError::ConnectionError(format!("Redis {command} failed: {error}"))
    } else {
        CacheError::BackendError(format!("Redis {command} failed: {error}"))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn connect(&self) -> CacheResult<()> {
        let manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                CacheError::ConnectionError(format!("Failed to connect to Redis: {}", e))
            })?;

        *self.connection.write() = Some(manager);
        debug!(url = %self.redacted_url, "Redis backing store connected");
        Ok(())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        // Dropping the last ConnectionManager clone closes the multiplexed connection
        if self.connection.write().take().is_some() {
            debug!(url = %self.redacted_url, "Redis backing store disconnected");
        }
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection()?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("PING", e))?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::BackendError(format!(
                "Unexpected PING reply: {pong}"
            )))
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        let result: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("GET", e))?;

        Ok(result)
    }

    async fn get_with_ttl(&self, key: &str) -> CacheResult<Option<(Vec<u8>, Option<Duration>)>> {
        let mut conn = self.connection()?;
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("GET", e))?;

        // PTTL is -1 for keys without an expiry
        let remaining = u64::try_from(pttl).ok().map(Duration::from_millis);
        Ok(value.map(|bytes| (bytes, remaining)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection()?;

        redis::cmd("PSETEX")
            .arg(key)
            .arg(ttl_millis(ttl))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend_error("PSETEX", e))
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection()?;

        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("DEL", e))?;

        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.connection()?;

        let updated: u64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("PEXPIRE", e))?;

        Ok(updated == 1)
    }

    async fn flush_all(&self) -> CacheResult<()> {
        let mut conn = self.connection()?;

        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend_error("FLUSHDB", e))
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_does_not_connect() {
        let store = RedisStore::from_config(&BackingStoreConfig::default()).unwrap();
        assert_eq!(store.provider_name(), "redis");
        assert!(store.connection.read().is_none());
    }

    #[tokio::test]
    async fn test_operations_before_connect_are_not_connected() {
        let store = RedisStore::from_config(&BackingStoreConfig::default()).unwrap();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, CacheError::NotConnected { .. }));
    }

    #[test]
    fn test_ttl_keeps_millisecond_precision() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_millis(300)), 300);
        assert_eq!(ttl_millis(Duration::from_secs(90)), 90_000);
    }

    // Integration tests require a running Redis instance (behind test-services feature)
    #[cfg(feature = "test-services")]
    mod integration {
        use super::*;

        #[tokio::test]
        async fn test_round_trip_against_live_redis() {
            let store = RedisStore::from_config(&BackingStoreConfig::default()).unwrap();
            store.connect().await.unwrap();
            store.ping().await.unwrap();

            store
                .set("tiercache:test:key", b"value", Duration::from_secs(10))
                .await
                .unwrap();
            assert_eq!(
                store.get("tiercache:test:key").await.unwrap(),
                Some(b"value".to_vec())
            );
            let (bytes, remaining) = store
                .get_with_ttl("tiercache:test:key")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(bytes, b"value".to_vec());
            assert!(remaining.unwrap() <= Duration::from_secs(10));
            assert!(store.delete("tiercache:test:key").await.unwrap());
            assert!(!store.delete("tiercache:test:key").await.unwrap());

            store.disconnect().await.unwrap();
        }
    }
}
