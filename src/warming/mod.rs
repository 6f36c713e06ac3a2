//! # Predictive Warming
//!
//! Access pattern analysis and speculative pre-fetching on top of
//! [`ResilientCache`](crate::cache::ResilientCache).
//!
//! - [`pattern`]: interval statistics, frequency and pattern classification
//! - [`queue`]: bounded, priority-aware warmup task queue
//! - [`loader`]: named data loaders supplied by callers
//! - [`warmer`]: the [`CacheWarmer`] tying them together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tiercache_core::backing_store::InMemoryStore;
//! use tiercache_core::cache::ResilientCache;
//! use tiercache_core::config::CacheSystemConfig;
//! use tiercache_core::warming::{CacheWarmer, LoaderRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = CacheSystemConfig::default();
//! let cache = ResilientCache::new(Arc::new(InMemoryStore::new()), &config);
//! cache.start().await;
//!
//! let loaders = LoaderRegistry::new();
//! loaders.register_fn("quotes", |params| async move {
//!     Ok::<_, String>(json!({ "symbol": params["symbol"], "price": 150.25 }))
//! });
//!
//! let warmer = CacheWarmer::new(cache, config.warming, loaders);
//! warmer.start();
//!
//! let quote = warmer
//!     .get_with_predictive_warming("quote:AAPL", "quote", "quotes", json!({"symbol": "AAPL"}))
//!     .await;
//! # }
//! ```

pub mod loader;
pub mod pattern;
pub mod queue;
pub mod warmer;

pub use loader::{DataLoader, LoaderRegistry};
pub use pattern::{AccessFrequency, AccessPattern, PatternAnalyzer, PatternKind};
pub use queue::{PushOutcome, WarmupQueue, WarmupTask};
pub use warmer::{CacheWarmer, KeySource, PatternSnapshot, WarmerStatistics, WarmupOutcome};
