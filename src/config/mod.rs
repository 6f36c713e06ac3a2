//! # Cache Configuration System
//!
//! Typed configuration for the tiered cache. Values come from layered TOML
//! files and `TIERCACHE__*` environment variables (see [`loader`]), or from the
//! environment presets below when constructing the cache directly in code.
//!
//! ## Sections
//!
//! - **backing_store**: address, pool size, socket timeouts, health checks, reconnection backoff
//! - **tiers**: L1 capacity and TTL ceilings, expiry sweep cadence, fallback policy
//! - **circuit_breaker**: consecutive-failure threshold and open-state timeout
//! - **warming**: access-pattern history, prediction thresholds, warmup queue and scheduling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tiercache_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let l1_capacity = manager.config().tiers.l1_max_size;
//! let redis_url = manager.config().backing_store.redacted_url();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring tiercache.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSystemConfig {
    /// Shared network key-value store (L2) connection settings
    pub backing_store: BackingStoreConfig,

    /// L1/L2 tier sizing and TTL ceilings
    pub tiers: TierConfig,

    /// Circuit breaker protecting the backing store
    pub circuit_breaker: CircuitBreakerSettings,

    /// Predictive cache warming
    pub warming: WarmingConfig,
}

/// Backing store connection, pooling, and reconnection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackingStoreConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub password: Option<String>,
    pub max_connections: u32,
    pub socket_timeout_ms: u64,
    pub socket_connect_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub max_reconnection_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound on a single connection/error callback invocation
    pub callback_timeout_ms: u64,
}

impl Default for BackingStoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            max_connections: 20,
            socket_timeout_ms: 5_000,
            socket_connect_timeout_ms: 5_000,
            health_check_interval_ms: 30_000,
            max_reconnection_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            callback_timeout_ms: 5_000,
        }
    }
}

impl BackingStoreConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn socket_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_connect_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    /// Backoff before reconnection attempt number `consecutive_failures`.
    ///
    /// `min(initial * multiplier^(consecutive_failures - 1), max)`
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1) as i32;
        let scaled_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        if !scaled_ms.is_finite() || scaled_ms >= self.max_backoff_ms as f64 {
            return self.max_backoff();
        }
        Duration::from_millis(scaled_ms as u64)
    }

    /// Connection URL including credentials
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Connection URL safe for logs
    pub fn redacted_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:***@{}:{}/{}", self.host, self.port, self.db)
            }
            _ => self.connection_url(),
        }
    }
}

/// Tier sizing, TTL ceilings, and degradation policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TierConfig {
    /// Maximum number of entries held in the in-process tier
    pub l1_max_size: usize,
    /// TTL ceiling for L1 entries
    pub l1_ttl_seconds: u64,
    /// Default TTL for L2 writes when the caller supplies none
    pub l2_ttl_seconds: u64,
    /// Cadence of the background L1 expiry sweep
    pub sweep_interval_ms: u64,
    /// Report skipped or failed backing store calls as soft misses instead of errors
    pub enable_fallback: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            l1_max_size: 1_000,
            l1_ttl_seconds: 300,
            l2_ttl_seconds: 3_600,
            sweep_interval_ms: 60_000,
            enable_fallback: true,
        }
    }
}

impl TierConfig {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_seconds)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Circuit breaker settings as they appear in configuration files
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive L2 failures before the breaker opens
    pub failure_threshold: u32,
    /// Open-state duration before a half-open trial is allowed
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert to the runtime breaker configuration
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// Per data type warming parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataTypeConfig {
    /// Base TTL before the frequency multiplier is applied
    pub ttl_seconds: u64,
    /// Added to a warmup task's priority
    pub priority_weight: u32,
}

/// Predictive warming configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmingConfig {
    pub enabled: bool,
    pub max_pattern_history: usize,
    pub min_samples: usize,
    pub warmup_queue_size: usize,
    pub pattern_threshold: f64,
    pub burst_multiplier: f64,
    pub lead_time_seconds: u64,
    pub retry_delay_seconds: u64,
    pub max_retries: u32,
    pub warmup_check_interval_ms: u64,
    pub analysis_interval_seconds: u64,
    /// Keys not accessed for this long are dropped by the analysis sweep
    pub stale_pattern_seconds: u64,
    pub max_concurrent_warmups: usize,
    /// Base TTL for data types without an entry in `data_types`
    pub default_ttl_seconds: u64,
    pub data_types: HashMap<String, DataTypeConfig>,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pattern_history: 100,
            min_samples: 5,
            warmup_queue_size: 1_000,
            pattern_threshold: 0.7,
            burst_multiplier: 2.0,
            lead_time_seconds: 300,
            retry_delay_seconds: 300,
            max_retries: 3,
            warmup_check_interval_ms: 10_000,
            analysis_interval_seconds: 300,
            stale_pattern_seconds: 86_400,
            max_concurrent_warmups: 10,
            default_ttl_seconds: 300,
            data_types: default_data_types(),
        }
    }
}

fn default_data_types() -> HashMap<String, DataTypeConfig> {
    HashMap::from([
        (
            "price".to_string(),
            DataTypeConfig {
                ttl_seconds: 60,
                priority_weight: 3,
            },
        ),
        (
            "quote".to_string(),
            DataTypeConfig {
                ttl_seconds: 30,
                priority_weight: 3,
            },
        ),
        (
            "market_data".to_string(),
            DataTypeConfig {
                ttl_seconds: 300,
                priority_weight: 2,
            },
        ),
        (
            "news".to_string(),
            DataTypeConfig {
                ttl_seconds: 1_800,
                priority_weight: 1,
            },
        ),
        (
            "fundamentals".to_string(),
            DataTypeConfig {
                ttl_seconds: 3_600,
                priority_weight: 1,
            },
        ),
    ])
}

impl WarmingConfig {
    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(self.lead_time_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn warmup_check_interval(&self) -> Duration {
        Duration::from_millis(self.warmup_check_interval_ms)
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_seconds)
    }

    pub fn stale_pattern_age(&self) -> Duration {
        Duration::from_secs(self.stale_pattern_seconds)
    }

    /// Base TTL for a data type
    pub fn base_ttl(&self, data_type: &str) -> Duration {
        let seconds = self
            .data_types
            .get(data_type)
            .map(|dt| dt.ttl_seconds)
            .unwrap_or(self.default_ttl_seconds);
        Duration::from_secs(seconds)
    }

    /// Priority weight for a data type (unknown types weigh 1)
    pub fn priority_weight(&self, data_type: &str) -> u32 {
        self.data_types
            .get(data_type)
            .map(|dt| dt.priority_weight)
            .unwrap_or(1)
    }
}

impl CacheSystemConfig {
    /// Test configuration: tight timeouts and intervals for fast feedback
    pub fn for_test() -> Self {
        Self {
            backing_store: BackingStoreConfig {
                socket_timeout_ms: 200,
                socket_connect_timeout_ms: 200,
                health_check_interval_ms: 50,
                max_reconnection_attempts: 3,
                initial_backoff_ms: 10,
                max_backoff_ms: 100,
                callback_timeout_ms: 500,
                ..BackingStoreConfig::default()
            },
            tiers: TierConfig {
                l1_max_size: 100,
                l1_ttl_seconds: 60,
                l2_ttl_seconds: 300,
                sweep_interval_ms: 50,
                enable_fallback: true,
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 3,
                timeout_ms: 100,
            },
            warming: WarmingConfig {
                max_pattern_history: 10,
                warmup_check_interval_ms: 20,
                analysis_interval_seconds: 1,
                max_concurrent_warmups: 4,
                ..WarmingConfig::default()
            },
        }
    }

    /// Development configuration: production shape with shorter windows
    pub fn for_development() -> Self {
        Self {
            backing_store: BackingStoreConfig {
                health_check_interval_ms: 10_000,
                max_backoff_ms: 10_000,
                ..BackingStoreConfig::default()
            },
            tiers: TierConfig {
                l1_ttl_seconds: 60,
                l2_ttl_seconds: 600,
                sweep_interval_ms: 10_000,
                ..TierConfig::default()
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 3,
                timeout_ms: 15_000,
            },
            warming: WarmingConfig {
                analysis_interval_seconds: 60,
                ..WarmingConfig::default()
            },
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        let bs = &self.backing_store;
        if bs.host.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "host",
                "backing_store",
            ));
        }
        if bs.port == 0 {
            return Err(ConfigurationError::invalid_value(
                "backing_store.port",
                bs.port.to_string(),
                "port must be greater than 0",
            ));
        }
        if bs.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "backing_store.max_connections",
                "0",
                "at least one connection is required",
            ));
        }
        if bs.socket_timeout_ms == 0 || bs.socket_connect_timeout_ms == 0 {
            return Err(ConfigurationError::validation_error(
                "backing store socket timeouts must be greater than 0",
            ));
        }
        if bs.health_check_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "backing_store.health_check_interval_ms",
                "0",
                "health check interval must be greater than 0",
            ));
        }
        if bs.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backing_store.backoff_multiplier",
                bs.backoff_multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }
        if bs.initial_backoff_ms > bs.max_backoff_ms {
            return Err(ConfigurationError::validation_error(
                "initial_backoff_ms must not exceed max_backoff_ms",
            ));
        }

        if self.tiers.l1_max_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "tiers.l1_max_size",
                "0",
                "L1 capacity must be greater than 0",
            ));
        }
        if self.tiers.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "tiers.sweep_interval_ms",
                "0",
                "sweep interval must be greater than 0",
            ));
        }
        if self.tiers.l1_ttl_seconds == 0 {
            warn!("L1 TTL is 0 - local tier effectively disabled");
        }

        self.circuit_breaker
            .to_resilience_config()
            .validate()
            .map_err(ConfigurationError::validation_error)?;

        let w = &self.warming;
        if w.min_samples < 3 {
            return Err(ConfigurationError::invalid_value(
                "warming.min_samples",
                w.min_samples.to_string(),
                "at least 3 samples are needed for a standard deviation over intervals",
            ));
        }
        if w.max_pattern_history < w.min_samples {
            return Err(ConfigurationError::validation_error(
                "warming.max_pattern_history must be >= warming.min_samples",
            ));
        }
        if w.warmup_queue_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "warming.warmup_queue_size",
                "0",
                "queue size must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&w.pattern_threshold) {
            return Err(ConfigurationError::invalid_value(
                "warming.pattern_threshold",
                w.pattern_threshold.to_string(),
                "threshold must be between 0.0 and 1.0",
            ));
        }
        if w.burst_multiplier <= 0.0 {
            return Err(ConfigurationError::invalid_value(
                "warming.burst_multiplier",
                w.burst_multiplier.to_string(),
                "multiplier must be positive",
            ));
        }
        if w.max_concurrent_warmups == 0 || w.warmup_check_interval_ms == 0 {
            return Err(ConfigurationError::validation_error(
                "warming concurrency and check interval must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Log current configuration for debugging
    pub fn log_configuration(&self) {
        let bs = &self.backing_store;
        info!("Tiered cache configuration:");
        info!(
            "  Backing store: {} (pool {}, socket timeout {}ms, health check {}ms)",
            bs.redacted_url(),
            bs.max_connections,
            bs.socket_timeout_ms,
            bs.health_check_interval_ms
        );
        info!(
            "  Reconnection: {} attempts, backoff {}ms..{}ms x{}",
            bs.max_reconnection_attempts, bs.initial_backoff_ms, bs.max_backoff_ms, bs.backoff_multiplier
        );
        info!(
            "  Tiers: L1 {} entries / {}s TTL, L2 {}s TTL, fallback {}",
            self.tiers.l1_max_size,
            self.tiers.l1_ttl_seconds,
            self.tiers.l2_ttl_seconds,
            self.tiers.enable_fallback
        );
        info!(
            "  Circuit breaker: threshold {}, timeout {}ms",
            self.circuit_breaker.failure_threshold, self.circuit_breaker.timeout_ms
        );
        info!(
            "  Warming: enabled {}, history {}, queue {}, threshold {:.2}",
            self.warming.enabled,
            self.warming.max_pattern_history,
            self.warming.warmup_queue_size,
            self.warming.pattern_threshold
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        assert!(CacheSystemConfig::default().validate().is_ok());
        assert!(CacheSystemConfig::for_test().validate().is_ok());
        assert!(CacheSystemConfig::for_development().validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = BackingStoreConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            ..BackingStoreConfig::default()
        };

        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(4), Duration::from_millis(800));
        assert_eq!(config.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(config.backoff_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_connection_url_redaction() {
        let config = BackingStoreConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            db: 2,
            password: Some("hunter2".to_string()),
            ..BackingStoreConfig::default()
        };

        assert_eq!(config.connection_url(), "redis://:hunter2@cache.internal:6380/2");
        assert_eq!(config.redacted_url(), "redis://:***@cache.internal:6380/2");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = CacheSystemConfig::default();
        config.tiers.l1_max_size = 0;
        assert!(config.validate().is_err());

        let mut config = CacheSystemConfig::default();
        config.warming.pattern_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = CacheSystemConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = CacheSystemConfig::default();
        config.backing_store.host = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_data_type_lookup_falls_back() {
        let warming = WarmingConfig::default();
        assert_eq!(warming.base_ttl("price"), Duration::from_secs(60));
        assert_eq!(warming.base_ttl("unknown"), Duration::from_secs(300));
        assert_eq!(warming.priority_weight("price"), 3);
        assert_eq!(warming.priority_weight("unknown"), 1);
    }
}
