//! TierCache Demo Binary
//!
//! Runs the resilient cache and predictive warmer against a simulated quote
//! feed until Ctrl-C. Uses Redis from the loaded configuration, or the
//! in-memory store when `TIERCACHE_DEMO_STORE=memory`.

use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use tiercache_core::backing_store::InMemoryStore;
use tiercache_core::logging::init_structured_logging;
use tiercache_core::warming::{CacheWarmer, LoaderRegistry};
use tiercache_core::{ConfigManager, ResilientCache};

const SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "GOOG", "AMZN"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let manager = ConfigManager::load().context("failed to load cache configuration")?;
    let config = manager.config().clone();
    config.log_configuration();

    let use_memory = std::env::var("TIERCACHE_DEMO_STORE")
        .map(|store| store.eq_ignore_ascii_case("memory"))
        .unwrap_or(false);

    let cache = if use_memory {
        info!("Using in-memory backing store");
        ResilientCache::new(Arc::new(InMemoryStore::new()), &config)
    } else {
        ResilientCache::from_config(&config).context("failed to build Redis-backed cache")?
    };

    if !cache.start().await {
        warn!("Backing store unreachable, continuing on L1 only");
    }

    let loaders = LoaderRegistry::new();
    loaders.register_fn("quotes", |params| async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let symbol = params["symbol"].as_str().unwrap_or("UNKNOWN").to_string();
        Ok::<_, String>(json!({
            "symbol": symbol,
            "price": 100.0 + symbol.len() as f64,
            "as_of": chrono::Utc::now().to_rfc3339(),
        }))
    });

    let warmer = CacheWarmer::new(cache.clone(), config.warming.clone(), loaders);
    warmer.start();
    info!("Demo running, press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for symbol in SYMBOLS {
                    let key = format!("quote:{symbol}");
                    warmer
                        .get_with_predictive_warming(&key, "quote", "quotes", json!({ "symbol": symbol }))
                        .await;
                }
                let stats = warmer.statistics();
                let health = cache.health_check();
                info!(
                    requests = stats.total_requests,
                    hits = stats.cache_hits,
                    warmup_hits = stats.warmup_hits,
                    queue_depth = stats.queue_depth,
                    status = ?health.status,
                    l1_hit_rate = health.l1_hit_rate,
                    "Demo tick"
                );
            }
            result = signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Shutdown signal received");
                break;
            }
        }
    }

    warmer.shutdown().await;
    cache.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&warmer.statistics())?);
    Ok(())
}
