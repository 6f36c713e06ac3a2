//! # Tiered Cache
//!
//! In-process L1 ([`LocalCache`]), the value codec used for L2 payloads, and
//! the [`ResilientCache`] facade that coordinates both tiers with the circuit
//! breaker.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tiercache_core::backing_store::InMemoryStore;
//! use tiercache_core::cache::{CacheValue, ResilientCache};
//! use tiercache_core::config::CacheSystemConfig;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ResilientCache::new(Arc::new(InMemoryStore::new()), &CacheSystemConfig::default());
//! cache.start().await;
//!
//! cache
//!     .set("AAPL", CacheValue::Json(json!({"price": 150.25})), Some(Duration::from_secs(60)))
//!     .await?;
//! let value = cache.get("AAPL").await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod facade;
pub mod local;
pub mod stats;

pub use codec::{CacheValue, EncodedValue};
pub use facade::ResilientCache;
pub use local::{CacheEntry, LocalCache, LocalCacheStats};
pub use stats::{AggregateStats, HealthReport, HealthStatus};
