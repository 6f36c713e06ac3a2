//! # Circuit Breaker Implementation
//!
//! Shields callers from a degraded backing store. Three states:
//! Closed (normal operation), Open (failing fast), and Half-Open (one live
//! trial call decides whether to close again).
//!
//! The failure count, the open flag, and the open timestamp live under a single
//! mutex so the threshold check and the open transition happen in one critical
//! section. Call counters are lock-free atomics off the hot path.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lock-free counters that do not take part in state decisions
#[derive(Debug, Default)]
struct AtomicCallCounters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCallCounters {
    #[inline]
    fn record(&self, success: bool, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.rejected_calls.store(0, Ordering::Relaxed);
        self.total_duration_nanos.store(0, Ordering::Relaxed);
    }
}

/// State guarded by the breaker's single mutex
#[derive(Debug, Default)]
struct BreakerCore {
    open: bool,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    consecutive_failures: u64,
    activations: u64,
    /// Start of the in-flight half-open probe, if any
    trial_started_at: Option<Instant>,
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Timeout elapsed - the next call (only one) is a live trial
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    /// Breaker closed, call normally
    Allowed,
    /// Breaker half-open and this caller holds the single probe slot
    Trial,
    /// Breaker open (or a probe is already in flight), skip the dependency
    Rejected,
}

impl CallPermit {
    pub fn is_permitted(&self) -> bool {
        !matches!(self, CallPermit::Rejected)
    }
}

/// State change caused by recording an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    None,
    /// Closed -> Open
    Opened,
    /// Half-open trial failed, open window restarted
    Reopened,
    /// Open/Half-open -> Closed
    Closed,
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// Open flag, timestamps and failure count (single critical section)
    core: Mutex<BreakerCore>,

    /// Lock-free call counters
    counters: AtomicCallCounters,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            core: Mutex::new(BreakerCore::default()),
            counters: AtomicCallCounters::default(),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        let core = self.core.lock();
        self.state_of(&core)
    }

    fn state_of(&self, core: &BreakerCore) -> CircuitState {
        if !core.open {
            return CircuitState::Closed;
        }
        match core.opened_at {
            Some(opened_at) if opened_at.elapsed() > self.config.timeout => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
            None => CircuitState::HalfOpen,
        }
    }

    /// Whether the breaker currently reports open (including half-open)
    pub fn is_open(&self) -> bool {
        self.core.lock().open
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u64 {
        self.core.lock().consecutive_failures
    }

    /// Number of Closed -> Open transitions since creation or last reset
    pub fn activations(&self) -> u64 {
        self.core.lock().activations
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask whether a call may reach the protected dependency.
    ///
    /// During half-open exactly one caller receives [`CallPermit::Trial`];
    /// concurrent callers are rejected until that probe reports back. A probe
    /// that never reports is superseded after another full timeout window.
    pub fn try_acquire(&self) -> CallPermit {
        let mut core = self.core.lock();
        if !core.open {
            return CallPermit::Allowed;
        }

        if self.state_of(&core) != CircuitState::HalfOpen {
            drop(core);
            self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
            return CallPermit::Rejected;
        }

        let trial_available = match core.trial_started_at {
            None => true,
            Some(started) => started.elapsed() > self.config.timeout,
        };

        if trial_available {
            core.trial_started_at = Some(Instant::now());
            debug!(component = %self.name, "Circuit breaker half-open, admitting trial call");
            CallPermit::Trial
        } else {
            drop(core);
            self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
            CallPermit::Rejected
        }
    }

    /// Record a successful call. Any success closes the breaker.
    pub fn record_success(&self, duration: Duration) -> BreakerTransition {
        self.counters.record(true, duration);

        let mut core = self.core.lock();
        let was_open = core.open;
        core.consecutive_failures = 0;
        core.trial_started_at = None;

        if was_open {
            core.open = false;
            core.opened_at = None;
            core.opened_at_wall = None;
            drop(core);
            info!(component = %self.name, "Circuit breaker closed (recovered)");
            BreakerTransition::Closed
        } else {
            BreakerTransition::None
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, duration: Duration) -> BreakerTransition {
        self.counters.record(false, duration);

        let mut core = self.core.lock();
        core.consecutive_failures += 1;
        let failures = core.consecutive_failures;

        if core.open {
            if core.trial_started_at.take().is_some() {
                core.opened_at = Some(Instant::now());
                core.opened_at_wall = Some(Utc::now());
                drop(core);
                warn!(
                    component = %self.name,
                    consecutive_failures = failures,
                    "Circuit breaker trial failed, staying open"
                );
                return BreakerTransition::Reopened;
            }
            return BreakerTransition::None;
        }

        if failures >= self.config.failure_threshold as u64 {
            core.open = true;
            core.opened_at = Some(Instant::now());
            core.opened_at_wall = Some(Utc::now());
            core.activations += 1;
            drop(core);
            error!(
                component = %self.name,
                consecutive_failures = failures,
                failure_threshold = self.config.failure_threshold,
                timeout_ms = self.config.timeout.as_millis() as u64,
                "Circuit breaker opened (failing fast)"
            );
            return BreakerTransition::Opened;
        }

        BreakerTransition::None
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire().is_permitted() {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => {
                self.record_success(duration);
            }
            Err(_) => {
                self.record_failure(duration);
            }
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut core = self.core.lock();
        if !core.open {
            core.activations += 1;
        }
        core.open = true;
        core.opened_at = Some(Instant::now());
        core.opened_at_wall = Some(Utc::now());
        core.trial_started_at = None;
    }

    /// Force circuit to closed state, zeroing the failure count.
    ///
    /// Used when an out-of-band signal (a successful reconnection) proves the
    /// dependency is healthy again.
    pub fn force_closed(&self) -> BreakerTransition {
        let mut core = self.core.lock();
        let was_open = core.open;
        core.open = false;
        core.opened_at = None;
        core.opened_at_wall = None;
        core.consecutive_failures = 0;
        core.trial_started_at = None;
        drop(core);

        if was_open {
            info!(component = %self.name, "Circuit breaker closed by external signal");
            BreakerTransition::Closed
        } else {
            BreakerTransition::None
        }
    }

    /// Return to the initial state, clearing all counters
    pub fn reset(&self) {
        *self.core.lock() = BreakerCore::default();
        self.counters.reset();
        debug!(component = %self.name, "Circuit breaker reset");
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures, activations, opened_at) = {
            let core = self.core.lock();
            (
                self.state_of(&core),
                core.consecutive_failures,
                core.activations,
                core.opened_at_wall,
            )
        };

        let total_calls = self.counters.total_calls.load(Ordering::Relaxed);
        let success_count = self.counters.success_count.load(Ordering::Relaxed);
        let failure_count = self.counters.failure_count.load(Ordering::Relaxed);
        let total_nanos = self.counters.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            rejected_calls: self.counters.rejected_calls.load(Ordering::Relaxed),
            consecutive_failures,
            activations,
            current_state: state,
            opened_at,
            failure_rate,
            success_rate,
            average_duration,
        }
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::sleep;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test".to_string(),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = breaker(3, 100);

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_on_failures() {
        let circuit = breaker(2, 100);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.activations(), 1);

        let result = circuit
            .call(|| async { Ok::<_, String>("should not execute") })
            .await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::CircuitOpen { .. })
        ));
        assert_eq!(circuit.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_recovery() {
        let circuit = breaker(1, 50);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(60)).await;
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_trial() {
        let circuit = breaker(1, 30);
        circuit.record_failure(Duration::ZERO);

        sleep(Duration::from_millis(40)).await;

        assert_eq!(circuit.try_acquire(), CallPermit::Trial);
        assert_eq!(circuit.try_acquire(), CallPermit::Rejected);
        assert_eq!(circuit.try_acquire(), CallPermit::Rejected);
    }

    #[tokio::test]
    async fn test_failed_trial_restarts_open_window() {
        let circuit = breaker(1, 30);
        assert_eq!(circuit.record_failure(Duration::ZERO), BreakerTransition::Opened);

        sleep(Duration::from_millis(40)).await;
        assert_eq!(circuit.try_acquire(), CallPermit::Trial);
        assert_eq!(
            circuit.record_failure(Duration::ZERO),
            BreakerTransition::Reopened
        );

        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.try_acquire(), CallPermit::Rejected);
        assert_eq!(circuit.activations(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_once() {
        let circuit = Arc::new(breaker(5, 10_000));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let circuit = circuit.clone();
            handles.push(tokio::spawn(async move {
                circuit.record_failure(Duration::ZERO)
            }));
        }

        let mut opened = 0;
        for handle in handles {
            if handle.await.unwrap() == BreakerTransition::Opened {
                opened += 1;
            }
        }

        assert_eq!(opened, 1);
        assert_eq!(circuit.activations(), 1);
        assert_eq!(circuit.consecutive_failures(), 50);
    }

    #[test]
    fn test_force_operations() {
        let circuit = breaker(1, 1_000);

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);

        assert_eq!(circuit.force_closed(), BreakerTransition::Closed);
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.force_closed(), BreakerTransition::None);
    }

    #[test]
    fn test_reset_clears_counters() {
        let circuit = breaker(1, 1_000);
        circuit.record_failure(Duration::from_millis(2));
        assert!(circuit.is_open());

        circuit.reset();

        let metrics = circuit.metrics();
        assert_eq!(metrics.current_state, CircuitState::Closed);
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.activations, 0);
        assert!(metrics.opened_at.is_none());
    }
}
