//! # Structured Logging Module
//!
//! Environment-aware structured logging for the cache components, plus a few
//! helpers that give cache, connection, and warmup records a uniform shape.

use crate::backing_store::ConnectionState;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// `RUST_LOG` overrides the environment default. Set
/// `TIERCACHE_LOG_FORMAT=json` for JSON output.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = std::env::var("TIERCACHE_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let console_layer = (!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter())
        });
        let json_layer = json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
        });

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry()
            .with(console_layer)
            .with(json_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("TIERCACHE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log a cache operation that changed tier or breaker state
pub fn log_cache_operation(
    operation: &str,
    key: Option<&str>,
    tier: &str,
    outcome: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        key = key,
        tier = %tier,
        outcome = %outcome,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🗄️ CACHE_OPERATION"
    );
}

/// Log a backing store connection lifecycle event
pub fn log_connection_event(
    event: &str,
    state: ConnectionState,
    consecutive_failures: u32,
    details: Option<&str>,
) {
    tracing::info!(
        event = %event,
        state = %state,
        consecutive_failures = consecutive_failures,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔌 CONNECTION_EVENT"
    );
}

/// Log a predictive warmup operation
pub fn log_warmup_operation(
    operation: &str,
    key: &str,
    loader: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        key = %key,
        loader = loader,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔥 WARMUP_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_by_environment() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_cache_operation("set", Some("AAPL"), "l1", "ok", None);
        log_connection_event("connected", ConnectionState::Connected, 0, None);
        log_warmup_operation("execute", "AAPL", Some("prices"), "ok", None);
    }
}
