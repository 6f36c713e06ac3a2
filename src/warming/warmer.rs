//! # Predictive Cache Warmer
//!
//! Observes reads, keeps a bounded access history per key, and pre-fetches
//! values shortly before their predicted next access.
//!
//! ## Flow
//!
//! 1. [`CacheWarmer::get_with_predictive_warming`] records the access, reads
//!    through the facade, and loads on demand on a miss
//! 2. The key's history is re-analyzed; a confident periodic or burst pattern
//!    schedules a [`WarmupTask`] `lead_time` ahead of the predicted access
//! 3. The executor loop drains due tasks with bounded concurrency, skipping
//!    keys that are already cached and retrying failed loads
//!
//! Values written by the warmer get a dynamic TTL: the data type's base TTL
//! scaled by the key's access frequency.

use crate::cache::{AggregateStats, CacheValue, ResilientCache};
use crate::config::WarmingConfig;
use crate::error::CacheError;
use crate::events::{CacheEvent, CacheEventPublisher};
use crate::logging::log_warmup_operation;
use crate::utils::{BackgroundTasks, ShutdownSignal};
use crate::warming::loader::LoaderRegistry;
use crate::warming::pattern::{AccessPattern, PatternAnalyzer};
use crate::warming::queue::{PushOutcome, WarmupQueue, WarmupTask};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How to reload a key the warmer has seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySource {
    pub data_type: String,
    pub loader_name: String,
    pub loader_params: Value,
    /// Last time a read or preload named this source
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
}

/// Point-in-time export of access histories for restart recovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub captured_at: Option<DateTime<Utc>>,
    pub histories: HashMap<String, Vec<DateTime<Utc>>>,
    pub sources: HashMap<String, KeySource>,
}

/// What happened to one executed warmup task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// Value loaded and written to the cache
    Loaded,
    /// Key was already cached; loader not called
    Skipped,
    /// Load failed and the task was re-queued
    Retrying,
    /// Load failed with no retries left
    Dropped,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmerStatistics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Hits served from a value the warmer pre-fetched
    pub warmup_hits: u64,
    pub on_demand_loads: u64,
    pub warmups_scheduled: u64,
    pub warmups_executed: u64,
    pub warmups_skipped: u64,
    pub warmups_failed: u64,
    pub warmups_dropped: u64,
    pub avg_response_time_ms: f64,
    pub tracked_keys: usize,
    pub active_patterns: usize,
    pub queue_depth: usize,
    /// Per-tier counters from the underlying cache
    pub cache: AggregateStats,
}

#[derive(Debug, Default)]
struct WarmerCounters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    warmup_hits: AtomicU64,
    on_demand_loads: AtomicU64,
    warmups_scheduled: AtomicU64,
    warmups_executed: AtomicU64,
    warmups_skipped: AtomicU64,
    warmups_failed: AtomicU64,
    warmups_dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default)]
struct RunningMean {
    samples: u64,
    mean_ms: f64,
}

impl RunningMean {
    fn record(&mut self, elapsed: Duration) {
        self.samples += 1;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.mean_ms += (sample - self.mean_ms) / self.samples as f64;
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// Access-pattern driven cache warmer
#[derive(Debug)]
pub struct CacheWarmer {
    cache: Arc<ResilientCache>,
    config: WarmingConfig,
    analyzer: PatternAnalyzer,
    loaders: LoaderRegistry,
    histories: DashMap<String, VecDeque<DateTime<Utc>>>,
    patterns: DashMap<String, AccessPattern>,
    sources: DashMap<String, KeySource>,
    queue: WarmupQueue,
    warmed_keys: DashSet<String>,
    counters: WarmerCounters,
    latency: Mutex<RunningMean>,
    events: CacheEventPublisher,
    tasks: BackgroundTasks,
    shutdown: Mutex<ShutdownSignal>,
    running: AtomicBool,
}

impl CacheWarmer {
    pub fn new(
        cache: Arc<ResilientCache>,
        config: WarmingConfig,
        loaders: LoaderRegistry,
    ) -> Arc<Self> {
        let analyzer = PatternAnalyzer::new(
            config.min_samples,
            config.max_pattern_history,
            config.burst_multiplier,
        );
        let events = cache.events().clone();

        info!(
            enabled = config.enabled,
            max_pattern_history = config.max_pattern_history,
            warmup_queue_size = config.warmup_queue_size,
            pattern_threshold = config.pattern_threshold,
            loaders = ?loaders.names(),
            "Cache warmer created"
        );

        Arc::new(Self {
            queue: WarmupQueue::new(config.warmup_queue_size),
            cache,
            analyzer,
            loaders,
            histories: DashMap::new(),
            patterns: DashMap::new(),
            sources: DashMap::new(),
            warmed_keys: DashSet::new(),
            counters: WarmerCounters::default(),
            latency: Mutex::new(RunningMean::default()),
            events,
            tasks: BackgroundTasks::new("cache_warmer"),
            shutdown: Mutex::new(ShutdownSignal::new()),
            running: AtomicBool::new(false),
            config,
        })
    }

    /// Start the warmup executor and pattern analysis loops
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Cache warming disabled, background loops not started");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let signal = self.shutdown.lock().clone();

        let warmer = Arc::downgrade(self);
        let executor_signal = signal.clone();
        let check_interval = self.config.warmup_check_interval();
        self.tasks.spawn("warmup_executor", async move {
            while executor_signal.sleep(check_interval).await {
                let Some(warmer) = warmer.upgrade() else {
                    break;
                };
                let processed = warmer.execute_due_warmups().await;
                if processed > 0 {
                    debug!(processed = processed, "Executed due warmups");
                }
            }
        });

        let warmer = Arc::downgrade(self);
        let analysis_interval = self.config.analysis_interval();
        self.tasks.spawn("pattern_analysis", async move {
            while signal.sleep(analysis_interval).await {
                let Some(warmer) = warmer.upgrade() else {
                    break;
                };
                warmer.run_analysis_sweep();
            }
        });

        info!(
            check_interval_ms = check_interval.as_millis() as u64,
            analysis_interval_seconds = analysis_interval.as_secs(),
            "🔥 Cache warmer started"
        );
    }

    pub async fn shutdown(&self) {
        let signal = self.shutdown.lock().clone();
        signal.trigger();
        self.tasks.join_all(Duration::from_secs(5)).await;
        self.running.store(false, Ordering::SeqCst);
        *self.shutdown.lock() = ShutdownSignal::new();
        info!(queued = self.queue.len(), "🛑 Cache warmer shut down");
    }

    pub fn record_access(&self, key: &str) {
        self.record_access_at(key, Utc::now());
    }

    /// Append an access timestamp, dropping the oldest beyond `max_pattern_history`
    pub fn record_access_at(&self, key: &str, at: DateTime<Utc>) {
        let mut history = self.histories.entry(key.to_string()).or_default();
        history.push_back(at);
        while history.len() > self.config.max_pattern_history {
            history.pop_front();
        }
    }

    /// Recompute the pattern for `key`; `None` until enough samples exist
    pub fn analyze_pattern(&self, key: &str) -> Option<AccessPattern> {
        let history: Vec<DateTime<Utc>> = self
            .histories
            .get(key)
            .map(|h| h.iter().copied().collect())?;

        match self.analyzer.analyze(key, &history) {
            Some(pattern) => {
                self.patterns.insert(key.to_string(), pattern.clone());
                Some(pattern)
            }
            None => {
                self.patterns.remove(key);
                None
            }
        }
    }

    pub fn predict_next_access(&self, pattern: &AccessPattern) -> Option<DateTime<Utc>> {
        self.analyzer.predict_next_access(pattern)
    }

    /// Queue a pre-fetch `lead_time` ahead of the predicted access.
    ///
    /// Returns `false` when confidence is below `pattern_threshold`, the
    /// pattern is unpredictable, the warmup time has already passed, or the
    /// full queue rejected the task.
    pub fn schedule_warmup(
        &self,
        key: &str,
        data_type: &str,
        pattern: &AccessPattern,
        loader_name: &str,
        loader_params: Value,
    ) -> bool {
        if !self.config.enabled || pattern.prediction_confidence < self.config.pattern_threshold {
            return false;
        }
        let Some(predicted) = self.predict_next_access(pattern) else {
            return false;
        };

        let now = Utc::now();
        let warmup_time = predicted - to_chrono(self.config.lead_time());
        if warmup_time <= now {
            debug!(key = %key, predicted = %predicted, "Warmup window already passed");
            return false;
        }

        let priority = pattern.frequency.priority_weight()
            + self.config.priority_weight(data_type)
            + (pattern.prediction_confidence * 10.0).round() as u32;

        let task = WarmupTask {
            key: key.to_string(),
            data_type: data_type.to_string(),
            scheduled_time: warmup_time,
            priority,
            loader_name: loader_name.to_string(),
            loader_params,
            retry_count: 0,
            max_retries: self.config.max_retries,
        };

        if self.enqueue(task) {
            bump(&self.counters.warmups_scheduled);
            debug!(
                key = %key,
                scheduled_time = %warmup_time,
                priority = priority,
                "Warmup scheduled"
            );
            true
        } else {
            false
        }
    }

    /// Push a task, accounting for anything the bounded queue pushes out
    fn enqueue(&self, task: WarmupTask) -> bool {
        match self.queue.push(task) {
            PushOutcome::Queued | PushOutcome::Replaced => true,
            PushOutcome::Evicted(victim) => {
                self.drop_task(&victim, "evicted from full warmup queue");
                true
            }
            PushOutcome::Rejected(task) => {
                self.drop_task(&task, "warmup queue full");
                false
            }
        }
    }

    fn drop_task(&self, task: &WarmupTask, reason: &str) {
        bump(&self.counters.warmups_dropped);
        log_warmup_operation("drop", &task.key, Some(&task.loader_name), "dropped", Some(reason));
        self.events.publish(CacheEvent::WarmupDropped {
            key: task.key.clone(),
            reason: reason.to_string(),
        });
    }

    /// Base TTL for the data type scaled by the key's access frequency
    pub fn calculate_dynamic_ttl(&self, key: &str, data_type: &str) -> Duration {
        let base = self.config.base_ttl(data_type);
        match self.patterns.get(key) {
            Some(pattern) => base.mul_f64(pattern.frequency.ttl_multiplier()),
            None => base,
        }
    }

    /// Execute every task due now in batches of `max_concurrent_warmups`
    pub async fn execute_due_warmups(&self) -> usize {
        let due = self.queue.pop_due(Utc::now(), self.queue.capacity());
        if due.is_empty() {
            return 0;
        }

        let mut processed = 0;
        for batch in due.chunks(self.config.max_concurrent_warmups.max(1)) {
            let tasks: Vec<_> = batch
                .iter()
                .cloned()
                .map(|task| self.execute_task(task))
                .collect();
            processed += join_all(tasks).await.len();
        }
        processed
    }

    pub async fn execute_task(&self, mut task: WarmupTask) -> WarmupOutcome {
        if self.cache.contains(&task.key).await {
            bump(&self.counters.warmups_skipped);
            debug!(key = %task.key, "Key already cached, warmup skipped");
            return WarmupOutcome::Skipped;
        }

        match self.loaders.load(&task.loader_name, &task.loader_params).await {
            Ok(value) => {
                self.store_loaded(&task.key, &task.data_type, value).await;
                self.warmed_keys.insert(task.key.clone());
                bump(&self.counters.warmups_executed);
                log_warmup_operation("execute", &task.key, Some(&task.loader_name), "loaded", None);
                self.events.publish(CacheEvent::WarmupExecuted {
                    key: task.key,
                    loader: task.loader_name,
                });
                WarmupOutcome::Loaded
            }
            Err(e) => {
                bump(&self.counters.warmups_failed);
                let reason = e.to_string();

                // Retrying cannot help until somebody registers the loader
                let retryable = !matches!(e, CacheError::LoaderNotFound(_));
                if retryable && task.retry_count < task.max_retries {
                    task.retry_count += 1;
                    task.scheduled_time = Utc::now() + to_chrono(self.config.retry_delay());
                    log_warmup_operation(
                        "execute",
                        &task.key,
                        Some(&task.loader_name),
                        "retrying",
                        Some(&reason),
                    );
                    self.enqueue(task);
                    WarmupOutcome::Retrying
                } else {
                    self.drop_task(&task, &reason);
                    WarmupOutcome::Dropped
                }
            }
        }
    }

    async fn store_loaded(&self, key: &str, data_type: &str, value: CacheValue) -> bool {
        let ttl = self.calculate_dynamic_ttl(key, data_type);
        match self.cache.set(key, value, Some(ttl)).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to store loaded value");
                false
            }
        }
    }

    /// Read through the cache, loading on demand on a miss.
    ///
    /// Loader failures yield `None`. Every call feeds the key's access history
    /// and may schedule a predictive warmup.
    pub async fn get_with_predictive_warming(
        &self,
        key: &str,
        data_type: &str,
        loader_name: &str,
        loader_params: Value,
    ) -> Option<CacheValue> {
        let started = Instant::now();
        bump(&self.counters.total_requests);
        self.record_access(key);
        self.register_source(key, data_type, loader_name, &loader_params);

        let cached = match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, loading from source");
                None
            }
        };

        let value = match cached {
            Some(value) => {
                bump(&self.counters.cache_hits);
                if self.warmed_keys.remove(key).is_some() {
                    bump(&self.counters.warmup_hits);
                }
                Some(value)
            }
            None => {
                // A pre-fetched value that expired unread no longer counts
                self.warmed_keys.remove(key);
                bump(&self.counters.cache_misses);
                bump(&self.counters.on_demand_loads);
                match self.loaders.load(loader_name, &loader_params).await {
                    Ok(value) => {
                        self.store_loaded(key, data_type, value.clone()).await;
                        Some(value)
                    }
                    Err(e) => {
                        warn!(key = %key, loader = %loader_name, error = %e, "On-demand load failed");
                        None
                    }
                }
            }
        };

        if let Some(pattern) = self.analyze_pattern(key) {
            self.schedule_warmup(key, data_type, &pattern, loader_name, loader_params);
        }

        self.latency.lock().record(started.elapsed());
        value
    }

    fn register_source(&self, key: &str, data_type: &str, loader_name: &str, params: &Value) {
        self.sources.insert(
            key.to_string(),
            KeySource {
                data_type: data_type.to_string(),
                loader_name: loader_name.to_string(),
                loader_params: params.clone(),
                registered_at: Utc::now(),
            },
        );
    }

    /// Load and cache a value now.
    ///
    /// On loader failure a retry task is queued with the caller's priority
    /// and `false` is returned.
    pub async fn preload(
        &self,
        key: &str,
        data_type: &str,
        loader_name: &str,
        loader_params: Value,
        priority: u32,
    ) -> bool {
        self.register_source(key, data_type, loader_name, &loader_params);

        match self.loaders.load(loader_name, &loader_params).await {
            Ok(value) => {
                let stored = self.store_loaded(key, data_type, value).await;
                self.warmed_keys.insert(key.to_string());
                log_warmup_operation("preload", key, Some(loader_name), "loaded", None);
                stored
            }
            Err(e) => {
                bump(&self.counters.warmups_failed);
                let reason = e.to_string();
                log_warmup_operation("preload", key, Some(loader_name), "failed", Some(&reason));
                self.enqueue(WarmupTask {
                    key: key.to_string(),
                    data_type: data_type.to_string(),
                    scheduled_time: Utc::now() + to_chrono(self.config.retry_delay()),
                    priority,
                    loader_name: loader_name.to_string(),
                    loader_params,
                    retry_count: 1,
                    max_retries: self.config.max_retries,
                });
                false
            }
        }
    }

    /// Prune stale keys and schedule warmups for the rest.
    ///
    /// Returns the number of warmups scheduled.
    pub fn run_analysis_sweep(&self) -> usize {
        let cutoff = Utc::now() - to_chrono(self.config.stale_pattern_age());

        let mut stale = Vec::new();
        let mut live = Vec::new();
        for entry in self.histories.iter() {
            match entry.value().back() {
                Some(last) if *last >= cutoff => live.push(entry.key().clone()),
                _ => stale.push(entry.key().clone()),
            }
        }

        for key in &stale {
            self.histories.remove(key);
            self.patterns.remove(key);
            self.sources.remove(key);
            self.warmed_keys.remove(key);
        }

        // Preloaded keys that were never read have a source but no history
        let orphaned: Vec<String> = self
            .sources
            .iter()
            .filter(|e| e.value().registered_at < cutoff && !self.histories.contains_key(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in &orphaned {
            self.sources.remove(key);
        }
        self.warmed_keys
            .retain(|key| self.histories.contains_key(key) || self.sources.contains_key(key));

        let mut scheduled = 0;
        for key in &live {
            let Some(pattern) = self.analyze_pattern(key) else {
                continue;
            };
            if self.queue.contains_key(key) {
                continue;
            }
            let Some(source) = self.sources.get(key).map(|s| s.value().clone()) else {
                continue;
            };
            if self.schedule_warmup(
                key,
                &source.data_type,
                &pattern,
                &source.loader_name,
                source.loader_params,
            ) {
                scheduled += 1;
            }
        }

        if !stale.is_empty() || !orphaned.is_empty() || scheduled > 0 {
            info!(
                pruned = stale.len() + orphaned.len(),
                analyzed = live.len(),
                scheduled = scheduled,
                "Pattern analysis sweep complete"
            );
        }
        scheduled
    }

    pub fn export_patterns(&self) -> PatternSnapshot {
        PatternSnapshot {
            captured_at: Some(Utc::now()),
            histories: self
                .histories
                .iter()
                .map(|e| (e.key().clone(), e.value().iter().copied().collect()))
                .collect(),
            sources: self
                .sources
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Restore histories from a snapshot, replacing any existing history per key.
    ///
    /// Returns the number of keys restored.
    pub fn import_patterns(&self, snapshot: PatternSnapshot) -> usize {
        let restored = snapshot.histories.len();
        for (key, mut timestamps) in snapshot.histories {
            timestamps.sort_unstable();
            let skip = timestamps.len().saturating_sub(self.config.max_pattern_history);
            let history: VecDeque<DateTime<Utc>> = timestamps.into_iter().skip(skip).collect();
            self.histories.insert(key.clone(), history);
            self.analyze_pattern(&key);
        }
        for (key, source) in snapshot.sources {
            self.sources.insert(key, source);
        }
        info!(keys = restored, "Access patterns restored");
        restored
    }

    pub fn statistics(&self) -> WarmerStatistics {
        let c = &self.counters;
        WarmerStatistics {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            warmup_hits: c.warmup_hits.load(Ordering::Relaxed),
            on_demand_loads: c.on_demand_loads.load(Ordering::Relaxed),
            warmups_scheduled: c.warmups_scheduled.load(Ordering::Relaxed),
            warmups_executed: c.warmups_executed.load(Ordering::Relaxed),
            warmups_skipped: c.warmups_skipped.load(Ordering::Relaxed),
            warmups_failed: c.warmups_failed.load(Ordering::Relaxed),
            warmups_dropped: c.warmups_dropped.load(Ordering::Relaxed),
            avg_response_time_ms: self.latency.lock().mean_ms,
            tracked_keys: self.histories.len(),
            active_patterns: self.patterns.len(),
            queue_depth: self.queue.len(),
            cache: self.cache.stats(),
        }
    }

    pub fn pattern(&self, key: &str) -> Option<AccessPattern> {
        self.patterns.get(key).map(|p| p.value().clone())
    }

    pub fn history_len(&self, key: &str) -> usize {
        self.histories.get(key).map(|h| h.len()).unwrap_or(0)
    }

    pub fn queue(&self) -> &WarmupQueue {
        &self.queue
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    pub fn cache(&self) -> &Arc<ResilientCache> {
        &self.cache
    }

    pub fn config(&self) -> &WarmingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::InMemoryStore;
    use crate::config::CacheSystemConfig;
    use crate::warming::pattern::{AccessFrequency, PatternKind};
    use serde_json::json;

    async fn warmer_with(config: CacheSystemConfig) -> Arc<CacheWarmer> {
        let cache = ResilientCache::new(Arc::new(InMemoryStore::new()), &config);
        cache.start().await;
        CacheWarmer::new(cache, config.warming, LoaderRegistry::new())
    }

    fn feed(warmer: &CacheWarmer, key: &str, gap_secs: i64, count: usize) {
        let start = Utc::now() - chrono::Duration::seconds(gap_secs * (count as i64 - 1));
        for i in 0..count {
            warmer.record_access_at(key, start + chrono::Duration::seconds(gap_secs * i as i64));
        }
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let warmer = warmer_with(CacheSystemConfig::for_test()).await;
        feed(&warmer, "k", 1, 25);
        assert_eq!(warmer.history_len("k"), 10);
    }

    #[tokio::test]
    async fn test_dynamic_ttl_scales_with_frequency() {
        let warmer = warmer_with(CacheSystemConfig::for_test()).await;
        assert_eq!(
            warmer.calculate_dynamic_ttl("unseen", "price"),
            Duration::from_secs(60)
        );

        feed(&warmer, "hot", 10, 10);
        let pattern = warmer.analyze_pattern("hot").unwrap();
        assert_eq!(pattern.frequency, AccessFrequency::High);
        assert_eq!(
            warmer.calculate_dynamic_ttl("hot", "price"),
            Duration::from_secs(90)
        );

        feed(&warmer, "cold", 900, 10);
        warmer.analyze_pattern("cold").unwrap();
        assert_eq!(
            warmer.calculate_dynamic_ttl("cold", "news"),
            Duration::from_secs(1_440)
        );
    }

    #[tokio::test]
    async fn test_schedule_respects_lead_time_and_confidence() {
        let warmer = warmer_with(CacheSystemConfig::for_test()).await;

        // 600s periodic: next access in 10 minutes, warmup 5 minutes from now
        feed(&warmer, "slow", 600, 10);
        let pattern = warmer.analyze_pattern("slow").unwrap();
        assert_eq!(pattern.pattern, PatternKind::Periodic);
        assert!(warmer.schedule_warmup("slow", "price", &pattern, "prices", json!({})));

        let task = warmer.queue().get("slow").unwrap();
        // low frequency 1 + price weight 3 + confidence 10
        assert_eq!(task.priority, 14);
        assert!(task.scheduled_time > Utc::now());

        // 60s periodic: warmup time is already in the past
        feed(&warmer, "fast", 60, 10);
        let pattern = warmer.analyze_pattern("fast").unwrap();
        assert!(!warmer.schedule_warmup("fast", "price", &pattern, "prices", json!({})));

        let mut weak = pattern.clone();
        weak.prediction_confidence = 0.5;
        assert!(!warmer.schedule_warmup("weak", "price", &weak, "prices", json!({})));
    }

    #[tokio::test]
    async fn test_snapshot_restores_patterns() {
        let warmer = warmer_with(CacheSystemConfig::for_test()).await;
        feed(&warmer, "k", 600, 10);
        warmer.sources.insert(
            "k".to_string(),
            KeySource {
                data_type: "price".to_string(),
                loader_name: "prices".to_string(),
                loader_params: json!({"SYM": "X"}),
                registered_at: Utc::now(),
            },
        );
        let snapshot = warmer.export_patterns();

        let restored = warmer_with(CacheSystemConfig::for_test()).await;
        assert_eq!(restored.import_patterns(snapshot), 1);
        assert_eq!(restored.history_len("k"), 10);
        assert!(restored.pattern("k").is_some());
        assert_eq!(restored.run_analysis_sweep(), 1);
        assert!(restored.queue().contains_key("k"));
    }

    #[tokio::test]
    async fn test_sweep_prunes_stale_keys() {
        let mut config = CacheSystemConfig::for_test();
        config.warming.stale_pattern_seconds = 60;
        let warmer = warmer_with(config).await;

        let old = Utc::now() - chrono::Duration::hours(2);
        warmer.record_access_at("old", old);
        warmer.record_access("fresh");

        warmer.run_analysis_sweep();
        assert_eq!(warmer.history_len("old"), 0);
        assert_eq!(warmer.history_len("fresh"), 1);
    }

    #[tokio::test]
    async fn test_sweep_prunes_unread_preloads() {
        let mut config = CacheSystemConfig::for_test();
        config.warming.stale_pattern_seconds = 60;
        let warmer = warmer_with(config).await;
        let source = |registered_at| KeySource {
            data_type: "price".to_string(),
            loader_name: "prices".to_string(),
            loader_params: json!({}),
            registered_at,
        };

        // Preloaded two hours ago and never read
        warmer
            .sources
            .insert("old".to_string(), source(Utc::now() - chrono::Duration::hours(2)));
        warmer.warmed_keys.insert("old".to_string());
        // Preloaded just now
        warmer.sources.insert("new".to_string(), source(Utc::now()));
        warmer.warmed_keys.insert("new".to_string());
        // Marker left behind with nothing else tracking the key
        warmer.warmed_keys.insert("ghost".to_string());

        warmer.run_analysis_sweep();

        assert!(!warmer.sources.contains_key("old"));
        assert!(!warmer.warmed_keys.contains("old"));
        assert!(warmer.sources.contains_key("new"));
        assert!(warmer.warmed_keys.contains("new"));
        assert!(!warmer.warmed_keys.contains("ghost"));
    }
}
