//! # Resilient Cache Facade
//!
//! Single entry point over the two tiers:
//!
//! - **L1**: [`LocalCache`], always consulted first and always written
//! - **L2**: the shared backing store, reached through [`BackingStoreConnection`]
//!   and guarded by a [`CircuitBreaker`]
//!
//! L2 is skipped while the breaker is open or the connection is not
//! `Connected`. L2 failures count against the breaker; serialization problems
//! never do. With `enable_fallback` on, skips succeed on L1 alone and backing
//! store failures surface as soft misses (`Ok(None)` / `Ok(false)`). With it
//! off, both are returned as errors (`CircuitOpen`, `NotConnected`, or the
//! driver error); the L1 side of a write still stands.
//!
//! A successful (re)connection reported by the connection manager closes the
//! breaker immediately, without waiting for the open timeout.

use crate::backing_store::{BackingStore, BackingStoreConnection, ConnectionEvent};
use crate::cache::codec::{self, CacheValue};
use crate::cache::local::LocalCache;
use crate::cache::stats::{AggregateStats, AtomicCacheStats, HealthReport, HealthStatus};
use crate::config::{CacheSystemConfig, TierConfig};
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, CacheEventPublisher, PublishedEvent};
use crate::logging::log_cache_operation;
use crate::resilience::{BreakerTransition, CallPermit, CircuitBreaker, CircuitState};
use crate::utils::{BackgroundTasks, ShutdownSignal};
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const BREAKER_COMPONENT: &str = "backing_store";

/// Two-tier cache with a circuit-breaker protected backing store
#[derive(Debug)]
pub struct ResilientCache {
    local: Arc<LocalCache>,
    connection: Arc<BackingStoreConnection>,
    breaker: Arc<CircuitBreaker>,
    tiers: TierConfig,
    stats: Arc<AtomicCacheStats>,
    events: CacheEventPublisher,
    tasks: BackgroundTasks,
    shutdown: Mutex<ShutdownSignal>,
    sweep_running: AtomicBool,
}

impl ResilientCache {
    /// Build a cache over an existing backing store driver
    pub fn new(store: Arc<dyn BackingStore>, config: &CacheSystemConfig) -> Arc<Self> {
        let events = CacheEventPublisher::default();
        let connection = BackingStoreConnection::with_events(
            store,
            config.backing_store.clone(),
            events.clone(),
        );
        let breaker = Arc::new(CircuitBreaker::new(
            BREAKER_COMPONENT.to_string(),
            config.circuit_breaker.to_resilience_config(),
        ));
        let stats = Arc::new(AtomicCacheStats::default());

        {
            let breaker = breaker.clone();
            let events = events.clone();
            connection.add_connection_callback(move |event: ConnectionEvent| {
                let breaker = breaker.clone();
                let events = events.clone();
                async move {
                    if event.success()
                        && breaker.force_closed() == BreakerTransition::Closed
                    {
                        publish_breaker_state(&events, &breaker);
                    }
                }
            });
        }

        info!(
            provider = connection.provider_name(),
            l1_max_size = config.tiers.l1_max_size,
            l1_ttl_seconds = config.tiers.l1_ttl_seconds,
            l2_ttl_seconds = config.tiers.l2_ttl_seconds,
            enable_fallback = config.tiers.enable_fallback,
            "Resilient cache created"
        );

        Arc::new(Self {
            local: Arc::new(LocalCache::new(config.tiers.l1_max_size)),
            connection,
            breaker,
            tiers: config.tiers.clone(),
            stats,
            events,
            tasks: BackgroundTasks::new("resilient_cache"),
            shutdown: Mutex::new(ShutdownSignal::new()),
            sweep_running: AtomicBool::new(false),
        })
    }

    /// Build a Redis-backed cache from validated configuration.
    ///
    /// Invalid configuration or a malformed backing store address is a hard
    /// error; an unreachable server is not (call [`start`](Self::start) to connect).
    #[cfg(feature = "redis-store")]
    pub fn from_config(config: &CacheSystemConfig) -> CacheResult<Arc<Self>> {
        config.validate()?;
        let store = crate::backing_store::RedisStore::from_config(&config.backing_store)?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Connect to the backing store and start the L1 sweep loop.
    ///
    /// Returns whether the backing store is reachable; the cache serves from L1
    /// either way and keeps reconnecting in the background.
    pub async fn start(&self) -> bool {
        self.start_sweep_loop();
        let connected = self.connection.connect().await;
        if !connected {
            warn!(
                provider = self.connection.provider_name(),
                "Backing store unavailable at startup, serving from L1 until it recovers"
            );
        }
        connected
    }

    /// Stop background loops and disconnect from the backing store
    pub async fn shutdown(&self) {
        let signal = self.shutdown.lock().clone();
        signal.trigger();
        self.tasks.join_all(Duration::from_secs(5)).await;
        self.connection.disconnect().await;
        self.sweep_running.store(false, Ordering::SeqCst);
        *self.shutdown.lock() = ShutdownSignal::new();
        info!("🛑 Resilient cache shut down");
    }

    fn start_sweep_loop(&self) {
        if self.sweep_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let signal = self.shutdown.lock().clone();
        let local = self.local.clone();
        let interval = self.tiers.sweep_interval();
        self.tasks.spawn("l1_sweep", async move {
            while signal.sleep(interval).await {
                let removed = local.sweep_expired();
                if removed > 0 {
                    debug!(removed = removed, "Swept expired L1 entries");
                }
            }
        });
    }

    /// Read a key through L1 then L2, back-filling L1 on an L2 hit
    pub async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        if let Some(value) = self.local.get(key) {
            self.stats.record_l1(true);
            self.stats.record_outcome(true);
            debug!(key = %key, "L1 HIT");
            return Ok(Some(value));
        }
        self.stats.record_l1(false);

        if let Err(skipped) = self.l2_permit() {
            debug!(key = %key, reason = %skipped, "L1 MISS, backing store skipped");
            return self.skip_l2(skipped).map(|_| None);
        }

        let started = Instant::now();
        let result = self
            .connection
            .run_connected("GET", |store| async move { store.get_with_ttl(key).await })
            .await;

        match result {
            Ok(Some((bytes, remaining))) => {
                self.on_l2_success(started.elapsed());
                match codec::decode(key, bytes) {
                    Ok(value) => {
                        self.stats.record_l2(true);
                        self.stats.record_outcome(true);
                        // L1 must not outlive the L2 copy
                        let l1_ttl = remaining
                            .map_or(self.tiers.l1_ttl(), |left| left.min(self.tiers.l1_ttl()));
                        self.local.set(key, value.clone(), l1_ttl);
                        debug!(key = %key, kind = value.kind(), "L2 HIT, back-filled L1");
                        Ok(Some(value))
                    }
                    Err(e) => {
                        self.stats.record_l2(false);
                        self.soft_failure("get", key, e).map(|_| None)
                    }
                }
            }
            Ok(None) => {
                self.on_l2_success(started.elapsed());
                self.stats.record_l2(false);
                self.stats.record_outcome(true);
                debug!(key = %key, "L2 MISS");
                Ok(None)
            }
            Err(e) => {
                self.on_l2_error(&e, started.elapsed());
                self.stats.record_l2(false);
                self.soft_failure("get", key, e).map(|_| None)
            }
        }
    }

    /// Write to L1 (TTL capped at `l1_ttl`) and to L2 with the full TTL.
    ///
    /// `ttl = None` uses the configured `l2_ttl`. Returns `Ok(false)` when the
    /// L2 write failed; the L1 write stands regardless.
    pub async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> CacheResult<bool> {
        let ttl = ttl.unwrap_or_else(|| self.tiers.l2_ttl());

        let encoded = match codec::encode(key, &value) {
            Ok(encoded) => encoded,
            Err(e) => return self.soft_failure("set", key, e).map(|_| false),
        };

        self.local.set(key, value, ttl.min(self.tiers.l1_ttl()));

        if let Err(skipped) = self.l2_permit() {
            debug!(key = %key, reason = %skipped, "L1-only write, backing store skipped");
            return self.skip_l2(skipped).map(|_| true);
        }

        let bytes = encoded.into_bytes();
        let started = Instant::now();
        let result = self
            .connection
            .run_connected("SET", |store| async move { store.set(key, &bytes, ttl).await })
            .await;

        match result {
            Ok(()) => {
                self.on_l2_success(started.elapsed());
                self.stats.record_outcome(true);
                debug!(key = %key, ttl_seconds = ttl.as_secs(), "Cache SET");
                Ok(true)
            }
            Err(e) => {
                self.on_l2_error(&e, started.elapsed());
                self.soft_failure("set", key, e).map(|_| false)
            }
        }
    }

    /// Remove a key from L1 and, when the breaker allows, from L2
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.local.delete(key);

        if let Err(skipped) = self.l2_permit() {
            return self.skip_l2(skipped).map(|_| true);
        }

        let started = Instant::now();
        let result = self
            .connection
            .run_connected("DEL", |store| async move { store.delete(key).await })
            .await;

        match result {
            Ok(_) => {
                self.on_l2_success(started.elapsed());
                self.stats.record_outcome(true);
                debug!(key = %key, "Cache DEL");
                Ok(true)
            }
            Err(e) => {
                self.on_l2_error(&e, started.elapsed());
                self.soft_failure("delete", key, e).map(|_| false)
            }
        }
    }

    /// Empty L1, flush L2 if connected, and reset statistics and breaker state
    pub async fn clear_all(&self) -> CacheResult<bool> {
        self.local.clear();

        let flushed = if self.connection.is_connected() {
            self.connection
                .run_connected("FLUSHDB", |store| async move { store.flush_all().await })
                .await
        } else {
            Ok(())
        };

        self.stats.reset();
        self.breaker.reset();
        self.events.publish(CacheEvent::CacheCleared);
        log_cache_operation("clear_all", None, "all", "cleared", None);

        match flushed {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "Backing store flush failed during clear_all");
                if self.tiers.enable_fallback {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Whether a live value exists in either tier.
    ///
    /// Does not touch statistics, L1 recency, or the breaker; L2 is only
    /// probed while the breaker is fully closed.
    pub async fn contains(&self, key: &str) -> bool {
        if self.local.contains_key(key) {
            return true;
        }
        if !self.connection.is_connected() || self.breaker.state() != CircuitState::Closed {
            return false;
        }

        matches!(
            self.connection
                .run_connected("GET", |store| async move { store.get(key).await })
                .await,
            Ok(Some(_))
        )
    }

    /// Serialize `value` as JSON and store it
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        match CacheValue::from_serializable(key, value) {
            Ok(value) => self.set(key, value, ttl).await,
            Err(e) => self.soft_failure("set_json", key, e).map(|_| false),
        }
    }

    /// Read a key and deserialize it into `T`
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        match value.to_typed(key) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value does not match requested type");
                if self.tiers.enable_fallback {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    pub fn stats(&self) -> AggregateStats {
        self.stats.snapshot()
    }

    /// Aggregate connection, breaker, and tier health into one report
    pub fn health_check(&self) -> HealthReport {
        let stats = self.stats.snapshot();
        let circuit_breaker = self.breaker.metrics();
        let connection_state = self.connection.state();
        let status = HealthStatus::classify(
            &stats,
            self.breaker.is_open(),
            self.connection.is_connected(),
        );

        HealthReport {
            status,
            provider: self.connection.provider_name(),
            connection_state,
            connection: self.connection.stats(),
            circuit_breaker,
            stats,
            l1: self.local.stats(),
            l1_hit_rate: stats.l1_hit_rate(),
            l2_hit_rate: stats.l2_hit_rate(),
            checked_at: Utc::now(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &CacheEventPublisher {
        &self.events
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub fn connection(&self) -> &Arc<BackingStoreConnection> {
        &self.connection
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn tier_config(&self) -> &TierConfig {
        &self.tiers
    }

    /// Permission to call L2, or `None` when it must be skipped
    /// Admission to L2, or the reason it is skipped
    fn l2_permit(&self) -> CacheResult<CallPermit> {
        if !self.connection.is_connected() {
            return Err(CacheError::NotConnected {
                state: self.connection.state().to_string(),
            });
        }
        match self.breaker.try_acquire() {
            CallPermit::Rejected => Err(CacheError::CircuitOpen {
                component: self.breaker.name().to_string(),
            }),
            permit => Ok(permit),
        }
    }

    /// Account for an L1-only operation; without fallback the skip is an error
    fn skip_l2(&self, skipped: CacheError) -> CacheResult<()> {
        self.stats.record_fallback();
        if self.tiers.enable_fallback {
            self.stats.record_outcome(true);
            Ok(())
        } else {
            self.stats.record_outcome(false);
            Err(skipped)
        }
    }

    fn on_l2_success(&self, duration: Duration) {
        if self.breaker.record_success(duration) == BreakerTransition::Closed {
            publish_breaker_state(&self.events, &self.breaker);
            log_cache_operation("l2_call", None, "l2", "circuit_closed", None);
        }
    }

    fn on_l2_error(&self, error: &CacheError, duration: Duration) {
        if !error.counts_against_breaker() {
            return;
        }
        match self.breaker.record_failure(duration) {
            BreakerTransition::Opened => {
                self.stats.record_activation();
                publish_breaker_state(&self.events, &self.breaker);
                let details = error.to_string();
                log_cache_operation("l2_call", None, "l2", "circuit_opened", Some(&details));
            }
            BreakerTransition::Reopened => publish_breaker_state(&self.events, &self.breaker),
            _ => {}
        }
    }

    /// Record a failed operation and apply the fallback policy
    fn soft_failure(&self, operation: &str, key: &str, error: CacheError) -> CacheResult<()> {
        self.stats.record_outcome(false);
        warn!(operation = operation, key = %key, error = %error, "Cache operation failed");

        if self.tiers.enable_fallback {
            if error.counts_against_breaker() {
                self.stats.record_fallback();
            }
            Ok(())
        } else {
            Err(error)
        }
    }
}

fn publish_breaker_state(events: &CacheEventPublisher, breaker: &CircuitBreaker) {
    events.publish(CacheEvent::CircuitStateChanged {
        component: breaker.name().to_string(),
        state: breaker.state(),
        consecutive_failures: breaker.consecutive_failures(),
    });
}
