//! Aggregate facade statistics and health reporting types

use crate::backing_store::{ConnectionState, ConnectionStats};
use crate::cache::local::LocalCacheStats;
use crate::resilience::CircuitBreakerMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the facade counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub circuit_breaker_activations: u64,
    pub fallback_invocations: u64,
}

impl AggregateStats {
    pub fn l1_hit_rate(&self) -> f64 {
        ratio(self.l1_hits, self.l1_hits + self.l1_misses)
    }

    pub fn l2_hit_rate(&self) -> f64 {
        ratio(self.l2_hits, self.l2_hits + self.l2_misses)
    }

    /// Fraction of all lookups served from either tier
    pub fn overall_hit_rate(&self) -> f64 {
        ratio(self.l1_hits + self.l2_hits, self.l1_hits + self.l1_misses)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Lock-free counters behind [`AggregateStats`]
#[derive(Debug, Default)]
pub(crate) struct AtomicCacheStats {
    total_operations: AtomicU64,
    successful_operations: AtomicU64,
    failed_operations: AtomicU64,
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    circuit_breaker_activations: AtomicU64,
    fallback_invocations: AtomicU64,
}

impl AtomicCacheStats {
    #[inline]
    pub(crate) fn record_outcome(&self, success: bool) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_operations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_operations.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_l1(&self, hit: bool) {
        let counter = if hit { &self.l1_hits } else { &self.l1_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_l2(&self, hit: bool) {
        let counter = if hit { &self.l2_hits } else { &self.l2_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_activation(&self) {
        self.circuit_breaker_activations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallback_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> AggregateStats {
        AggregateStats {
            total_operations: self.total_operations.load(Ordering::Relaxed),
            successful_operations: self.successful_operations.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            circuit_breaker_activations: self.circuit_breaker_activations.load(Ordering::Relaxed),
            fallback_invocations: self.fallback_invocations.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.total_operations,
            &self.successful_operations,
            &self.failed_operations,
            &self.l1_hits,
            &self.l1_misses,
            &self.l2_hits,
            &self.l2_misses,
            &self.circuit_breaker_activations,
            &self.fallback_invocations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Breaker closed, connection up, failures do not outnumber successes
    Healthy,
    /// Breaker open or connection down; serving from L1
    Degraded,
    /// More failed than successful operations
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health report combining every tier and the breaker
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub provider: &'static str,
    pub connection_state: ConnectionState,
    pub connection: ConnectionStats,
    pub circuit_breaker: CircuitBreakerMetrics,
    pub stats: AggregateStats,
    pub l1: LocalCacheStats,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn classify(stats: &AggregateStats, breaker_open: bool, connected: bool) -> Self {
        if stats.failed_operations > stats.successful_operations {
            HealthStatus::Unhealthy
        } else if breaker_open || !connected {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rates() {
        let stats = AtomicCacheStats::default();
        stats.record_l1(true);
        stats.record_l1(false);
        stats.record_l1(false);
        stats.record_l2(true);
        stats.record_l2(false);

        let snapshot = stats.snapshot();
        assert!((snapshot.l1_hit_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
        assert!((snapshot.l2_hit_rate() - 0.5).abs() < f64::EPSILON);
        assert!((snapshot.overall_hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(AggregateStats::default().l1_hit_rate(), 0.0);
    }

    #[test]
    fn test_classification_checks_unhealthy_first() {
        let mut stats = AggregateStats {
            successful_operations: 1,
            failed_operations: 2,
            ..AggregateStats::default()
        };
        assert_eq!(
            HealthStatus::classify(&stats, true, false),
            HealthStatus::Unhealthy
        );

        stats.failed_operations = 1;
        assert_eq!(
            HealthStatus::classify(&stats, true, true),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::classify(&stats, false, false),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::classify(&stats, false, true),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let stats = AtomicCacheStats::default();
        stats.record_outcome(true);
        stats.record_activation();
        stats.record_fallback();
        stats.reset();
        assert_eq!(stats.snapshot(), AggregateStats::default());
    }
}
