//! # In-Memory Backing Store
//!
//! Thread-safe in-memory key-value store for testing and development.
//!
//! ## Features
//!
//! - **TTL Expiry**: Entries expire lazily on read, like the network service
//! - **Availability Toggle**: Simulate an unreachable server (connect and ping fail)
//! - **Failure Injection**: Fail the next N data operations, or all of them while connected
//! - **Latency Injection**: Delay every operation to exercise socket timeouts
//! - **Call Counters**: Per-operation counts for asserting on L2 traffic

use crate::backing_store::traits::BackingStore;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    connect: AtomicU64,
    ping: AtomicU64,
    get: AtomicU64,
    set: AtomicU64,
    delete: AtomicU64,
    expire: AtomicU64,
    flush: AtomicU64,
}

/// Snapshot of per-operation call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCallCounts {
    pub connect: u64,
    pub ping: u64,
    pub get: u64,
    pub set: u64,
    pub delete: u64,
    pub expire: u64,
    pub flush: u64,
}

impl StoreCallCounts {
    /// Calls that carry cache data (everything except connect and ping)
    pub fn data_calls(&self) -> u64 {
        self.get + self.set + self.delete + self.expire + self.flush
    }
}

/// In-memory backing store for testing
///
/// Starts available and disconnected. Connect behaves like the network
/// driver: it only succeeds while the store is marked available.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
    available: AtomicBool,
    connected: AtomicBool,
    failing: AtomicBool,
    fail_next: AtomicU32,
    latency: Mutex<Option<Duration>>,
    counters: CallCounters,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            latency: Mutex::new(None),
            counters: CallCounters::default(),
        }
    }

    /// Mark the server reachable or unreachable.
    ///
    /// Going unavailable also drops the current connection.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Fail every data operation while still answering PING
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` data operations
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        let c = &self.counters;
        StoreCallCounts {
            connect: c.connect.load(Ordering::Relaxed),
            ping: c.ping.load(Ordering::Relaxed),
            get: c.get.load(Ordering::Relaxed),
            set: c.set.load(Ordering::Relaxed),
            delete: c.delete.load(Ordering::Relaxed),
            expire: c.expire.load(Ordering::Relaxed),
            flush: c.flush.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counts(&self) {
        let c = &self.counters;
        for counter in [
            &c.connect, &c.ping, &c.get, &c.set, &c.delete, &c.expire, &c.flush,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes for a key, bypassing counters and failure injection
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.bytes.clone())
    }

    /// Clone of an unexpired entry; expired entries are removed on the way
    fn live_entry(&self, key: &str) -> Option<StoredValue> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, v| v.is_expired());
        }
        None
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn ensure_reachable(&self) -> CacheResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::ConnectionError(
                "in-memory store unavailable (connection refused)".to_string(),
            ))
        }
    }

    /// Gate shared by every data operation
    async fn begin_data_op(&self, counter: &AtomicU64, operation: &str) -> CacheResult<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.ensure_reachable()?;

        if !self.connected.load(Ordering::SeqCst) {
            return Err(CacheError::NotConnected {
                state: "disconnected".to_string(),
            });
        }

        let scripted = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted || self.failing.load(Ordering::SeqCst) {
            debug!(operation = operation, "Injected in-memory store failure");
            return Err(CacheError::BackendError(format!(
                "injected failure for {operation}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn connect(&self) -> CacheResult<()> {
        self.counters.connect.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.ensure_reachable()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.counters.ping.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.ensure_reachable()?;
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::NotConnected {
                state: "disconnected".to_string(),
            })
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.begin_data_op(&self.counters.get, "GET").await?;
        Ok(self.live_entry(key).map(|entry| entry.bytes))
    }

    async fn get_with_ttl(&self, key: &str) -> CacheResult<Option<(Vec<u8>, Option<Duration>)>> {
        self.begin_data_op(&self.counters.get, "GET").await?;
        Ok(self.live_entry(key).map(|entry| {
            let remaining = entry.expires_at.saturating_duration_since(Instant::now());
            (entry.bytes, Some(remaining))
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.begin_data_op(&self.counters.set, "SET").await?;

        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.begin_data_op(&self.counters.delete, "DEL").await?;

        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, value)| !value.is_expired()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.begin_data_op(&self.counters.expire, "EXPIRE").await?;

        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn flush_all(&self) -> CacheResult<()> {
        self.begin_data_op(&self.counters.flush, "FLUSHDB").await?;
        self.entries.clear();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
