//! Cache error types
//!
//! Every component converts its internal failures into `CacheError` at its
//! boundary. Only configuration errors are meant to stop initialization; the
//! rest degrade into soft misses or boolean results at the facade.

use crate::config::ConfigurationError;
use crate::resilience::CircuitBreakerError;
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to establish or keep a connection to the backing store
    #[error("Backing store connection error: {0}")]
    ConnectionError(String),

    /// Operation attempted while the backing store is not connected
    #[error("Backing store is not connected (state: {state})")]
    NotConnected { state: String },

    /// Failed to serialize or deserialize a cache value
    #[error("Cache serialization error for key '{key}': {reason}")]
    SerializationError { key: String, reason: String },

    /// Backing store operation timed out
    #[error("Backing store operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generic backend error reported by the driver
    #[error("Backing store backend error: {0}")]
    BackendError(String),

    /// Circuit breaker rejected the call
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// No loader registered under the requested name
    #[error("No data loader registered under '{0}'")]
    LoaderNotFound(String),

    /// A data loader failed to produce a value
    #[error("Data loader '{loader}' failed: {reason}")]
    LoaderError { loader: String, reason: String },

    /// Invalid configuration detected while building a component
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl CacheError {
    /// Create a serialization error for a key
    pub fn serialization<K: Into<String>, R: std::fmt::Display>(key: K, reason: R) -> Self {
        Self::SerializationError {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error for a named operation
    pub fn timeout<O: Into<String>>(operation: O, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a loader failure
    pub fn loader<L: Into<String>, R: std::fmt::Display>(loader: L, reason: R) -> Self {
        Self::LoaderError {
            loader: loader.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error reflects backing-store health.
    ///
    /// Serialization problems are a data issue for one key and must not
    /// move the circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError(_)
                | Self::NotConnected { .. }
                | Self::Timeout { .. }
                | Self::BackendError(_)
        )
    }
}

impl From<CircuitBreakerError<CacheError>> for CacheError {
    fn from(error: CircuitBreakerError<CacheError>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { component } => Self::CircuitOpen { component },
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_breaker_classification() {
        assert!(CacheError::ConnectionError("refused".into()).counts_against_breaker());
        assert!(CacheError::timeout("GET", Duration::from_millis(5)).counts_against_breaker());
        assert!(CacheError::BackendError("oops".into()).counts_against_breaker());
        assert!(!CacheError::serialization("k", "bad envelope").counts_against_breaker());
        assert!(!CacheError::loader("prices", "upstream 500").counts_against_breaker());
    }

    #[test]
    fn test_breaker_errors_flatten() {
        let open: CacheError = CircuitBreakerError::CircuitOpen {
            component: "backing_store".to_string(),
        }
        .into();
        assert!(matches!(open, CacheError::CircuitOpen { .. }));
        assert!(!open.counts_against_breaker());

        let failed: CacheError =
            CircuitBreakerError::OperationFailed(CacheError::BackendError("boom".into())).into();
        assert!(matches!(failed, CacheError::BackendError(_)));
    }

    #[test]
    fn test_timeout_message_includes_operation() {
        let err = CacheError::timeout("PING", Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "Backing store operation 'PING' timed out after 250ms"
        );
    }
}
