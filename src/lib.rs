#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, PING, SETEX in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TierCache Core
//!
//! Resilient two-tier cache with a circuit-breaker protected backing store
//! and predictive warming.
//!
//! ## Overview
//!
//! Reads go to an in-process L1 first and fall through to a shared network
//! L2 (Redis in production). The L2 connection reconnects on its own with
//! exponential backoff, and a circuit breaker stops the request path from
//! waiting on a backing store that keeps failing. While L2 is unavailable the
//! cache keeps serving from L1.
//!
//! On top of the cache, a warmer records per-key access times, classifies
//! them as periodic, burst, or random, and pre-fetches values shortly before
//! their predicted next access.
//!
//! ## Module Organization
//!
//! - [`backing_store`] - L2 driver trait, Redis and in-memory drivers, connection manager
//! - [`cache`] - L1, value codec, and the [`ResilientCache`] facade
//! - [`resilience`] - Circuit breaker
//! - [`warming`] - Access pattern analysis and the [`CacheWarmer`]
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`events`] - Lifecycle event broadcasting
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiercache_core::{CacheSystemConfig, CacheValue, ResilientCache};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheSystemConfig::default();
//! let cache = ResilientCache::from_config(&config)?;
//! cache.start().await;
//!
//! cache.set("AAPL", CacheValue::Json(json!({"price": 150.25})), None).await?;
//! if let Some(value) = cache.get("AAPL").await? {
//!     println!("AAPL: {:?}", value.as_json());
//! }
//!
//! println!("health: {:?}", cache.health_check().status);
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                          # Unit and integration tests (in-memory store)
//! cargo test --features test-services # Also run tests against a live Redis
//! ```

pub mod backing_store;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod resilience;
pub mod utils;
pub mod warming;

pub use backing_store::{BackingStore, BackingStoreConnection, ConnectionState, InMemoryStore};
pub use cache::{AggregateStats, CacheValue, HealthReport, HealthStatus, ResilientCache};
pub use config::{CacheSystemConfig, ConfigManager, ConfigurationError};
pub use error::{CacheError, CacheResult};
pub use events::{CacheEvent, CacheEventPublisher};
pub use resilience::{CircuitBreaker, CircuitState};
pub use warming::{CacheWarmer, LoaderRegistry};

#[cfg(feature = "redis-store")]
pub use backing_store::RedisStore;
