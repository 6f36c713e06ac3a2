#![allow(dead_code)]

pub mod strategies;

pub use strategies::*;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::backing_store::InMemoryStore;
use tiercache_core::config::CacheSystemConfig;
use tiercache_core::ResilientCache;

/// Cache over a fresh in-memory store, not yet started
pub fn test_cache_with(config: &CacheSystemConfig) -> (Arc<ResilientCache>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let cache = ResilientCache::new(store.clone(), config);
    (cache, store)
}

/// Started cache over a fresh in-memory store with the test configuration
pub async fn started_cache() -> (Arc<ResilientCache>, Arc<InMemoryStore>) {
    started_cache_with(&CacheSystemConfig::for_test()).await
}

pub async fn started_cache_with(
    config: &CacheSystemConfig,
) -> (Arc<ResilientCache>, Arc<InMemoryStore>) {
    let (cache, store) = test_cache_with(config);
    assert!(cache.start().await, "in-memory store should connect");
    (cache, store)
}

/// Poll `condition` every 5ms until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Async variant of [`wait_until`]
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}
