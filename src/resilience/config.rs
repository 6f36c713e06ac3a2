//! # Circuit Breaker Configuration
//!
//! Runtime configuration for a single circuit breaker. File-level settings live
//! in `crate::config::CircuitBreakerSettings` and convert into this type.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before a half-open trial is allowed
    pub timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Configuration suited to a shared network cache
    pub fn for_backing_store() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.timeout > Duration::from_secs(3600) {
            return Err("timeout should not exceed 3600 seconds".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::for_backing_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_bounds() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let zero_threshold = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(zero_threshold.validate().is_err());

        let zero_timeout = CircuitBreakerConfig {
            timeout: Duration::ZERO,
            ..CircuitBreakerConfig::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
