//! # Resilience Module
//!
//! Circuit breaker protecting the shared backing store.
//!
//! ## Usage
//!
//! ```rust
//! use tiercache_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     timeout: Duration::from_secs(30),
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("backing_store".to_string(), config);
//!
//! let result = circuit_breaker.call(|| async {
//!     Ok::<&str, std::io::Error>("pong")
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{
    BreakerTransition, CallPermit, CircuitBreaker, CircuitBreakerError, CircuitState,
};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
