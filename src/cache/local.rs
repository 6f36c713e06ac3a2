//! # Local Tier (L1)
//!
//! Capacity-bounded, TTL-aware in-process map with least-recently-used
//! eviction. Every read-modify-write sequence (expiry-check-then-delete,
//! evict-then-insert) runs inside one critical section, so the map never
//! holds more than `max_size` entries at an observable point.
//!
//! Recency is tracked with a monotonic access tick rather than wall-clock
//! timestamps, which makes the LRU victim unique even when two entries were
//! touched within the same clock tick.

use crate::cache::codec::CacheValue;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// A single L1 entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_access: Instant,
    access_tick: u64,
}

impl CacheEntry {
    fn new(value: CacheValue, ttl: Duration, tick: u64) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            ttl,
            access_count: 0,
            last_access: now,
            access_tick: tick,
        }
    }

    /// Expired once `ttl` has fully elapsed since creation
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        match self.created_at.checked_add(self.ttl) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// L1 counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalCacheStats {
    pub size: usize,
    pub capacity: usize,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug, Default)]
struct LocalInner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
    evictions: u64,
    expirations: u64,
}

impl LocalInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_tick)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&victim);
        self.evictions += 1;
        Some(victim)
    }
}

/// In-process L1 cache
#[derive(Debug)]
pub struct LocalCache {
    max_size: usize,
    inner: Mutex<LocalInner>,
}

impl LocalCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(LocalInner::default()),
        }
    }

    /// Look up a key, refreshing its recency on hit. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = inner.entries.get(key)?.is_expired_at(now);
        if expired {
            inner.entries.remove(key);
            inner.expirations += 1;
            return None;
        }

        let tick = inner.next_tick();
        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_access = now;
        entry.access_tick = tick;
        Some(entry.value.clone())
    }

    /// Read without touching recency or access counters
    pub fn peek(&self, key: &str) -> Option<CacheValue> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Copy of the entry metadata for a live key
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Insert or overwrite a key, evicting the least recently used entry when
    /// a new key arrives at capacity. Returns the evicted key, if any.
    pub fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Option<String> {
        if self.max_size == 0 {
            return None;
        }

        let mut inner = self.inner.lock();
        let mut evicted = None;

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_size {
            evicted = inner.evict_lru();
            if let Some(victim) = &evicted {
                debug!(evicted = %victim, incoming = %key, "L1 capacity reached, evicted LRU entry");
            }
        }

        let tick = inner.next_tick();
        inner
            .entries
            .insert(key.to_string(), CacheEntry::new(value, ttl, tick));
        evicted
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Remove every expired entry, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - inner.entries.len();
        inner.expirations += removed as u64;
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.evictions = 0;
        inner.expirations = 0;
    }

    /// Number of stored entries (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn stats(&self) -> LocalCacheStats {
        let inner = self.inner.lock();
        LocalCacheStats {
            size: inner.entries.len(),
            capacity: self.max_size,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(v: &str) -> CacheValue {
        CacheValue::Text(v.to_string())
    }

    #[test]
    fn test_get_hit_updates_access() {
        let cache = LocalCache::new(4);
        cache.set("a", text("1"), Duration::from_secs(60));

        assert_eq!(cache.get("a"), Some(text("1")));
        assert_eq!(cache.get("a"), Some(text("1")));
        assert_eq!(cache.entry("a").unwrap().access_count, 2);
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LocalCache::new(3);
        let ttl = Duration::from_secs(60);
        cache.set("a", text("1"), ttl);
        cache.set("b", text("2"), ttl);
        cache.set("c", text("3"), ttl);

        cache.get("a");
        let evicted = cache.set("d", text("4"), ttl);

        assert_eq!(evicted.as_deref(), Some("b"));
        assert_eq!(cache.len(), 3);
        assert!(cache.contains_key("a"));
        assert!(!cache.contains_key("b"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = LocalCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", text("1"), ttl);
        cache.set("b", text("2"), ttl);

        assert_eq!(cache.set("a", text("updated"), ttl), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a"), Some(text("updated")));
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let cache = LocalCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", text("1"), ttl);
        cache.set("b", text("2"), ttl);

        cache.peek("a");
        assert_eq!(cache.set("c", text("3"), ttl).as_deref(), Some("a"));
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = LocalCache::new(2);
        cache.set("gone", text("x"), Duration::ZERO);

        assert_eq!(cache.get("gone"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = LocalCache::new(10);
        cache.set("stale-1", text("x"), Duration::ZERO);
        cache.set("stale-2", text("x"), Duration::ZERO);
        cache.set("fresh", text("y"), Duration::from_secs(60));

        assert_eq!(cache.sweep_expired(), 2);
        assert_eq!(cache.keys(), vec!["fresh".to_string()]);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = LocalCache::new(4);
        cache.set("a", text("1"), Duration::from_secs(60));
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        cache.set("b", text("2"), Duration::from_secs(60));
        cache.clear();
        assert!(cache.is_empty());
    }
}
