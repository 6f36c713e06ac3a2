//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshot of a circuit breaker, used by health reporting.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls that reached the protected dependency
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Calls short-circuited because the breaker was open
    pub rejected_calls: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Number of Closed -> Open transitions
    pub activations: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// When the breaker last opened (None while closed)
    pub opened_at: Option<DateTime<Utc>>,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,

    /// Average duration of calls that reached the dependency
    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_calls: 0,
            consecutive_failures: 0,
            activations: 0,
            current_state: CircuitState::Closed,
            opened_at: None,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
