//! Configuration Loading Tests
//!
//! Layered TOML loading through `ConfigManager` and validation of the result.

use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use tiercache_core::config::{CacheSystemConfig, ConfigManager, ConfigurationError};

fn write(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).expect("write config file");
}

#[test]
fn config_has_expected_defaults() {
    let config = CacheSystemConfig::default();

    assert_eq!(config.tiers.l1_max_size, 1_000);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.warming.pattern_threshold, 0.7);
    assert_eq!(config.warming.burst_multiplier, 2.0);
    assert_eq!(config.warming.lead_time(), Duration::from_secs(300));
    assert_eq!(config.warming.retry_delay(), Duration::from_secs(300));
    assert!(config.tiers.enable_fallback);
    assert!(config.validate().is_ok());
}

#[test]
fn presets_validate() {
    assert!(CacheSystemConfig::for_test().validate().is_ok());
    assert!(CacheSystemConfig::for_development().validate().is_ok());
}

#[test]
fn layered_files_override_preset() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "tiercache.toml",
        r#"
[tiers]
l1_max_size = 250
l1_ttl_seconds = 30

[backing_store]
host = "cache.internal"
"#,
    );
    write(
        &dir,
        "tiercache.test.toml",
        r#"
[tiers]
l1_max_size = 50

[circuit_breaker]
failure_threshold = 7

[warming.data_types.crypto]
ttl_seconds = 15
priority_weight = 3
"#,
    );

    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
            .unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "test");
    // environment file wins over the base file, base file over the preset
    assert_eq!(config.tiers.l1_max_size, 50);
    assert_eq!(config.tiers.l1_ttl_seconds, 30);
    assert_eq!(config.backing_store.host, "cache.internal");
    assert_eq!(config.circuit_breaker.failure_threshold, 7);
    // untouched preset values survive
    assert_eq!(config.backing_store.socket_timeout_ms, 200);
    assert_eq!(config.warming.base_ttl("crypto"), Duration::from_secs(15));
    assert_eq!(config.warming.priority_weight("crypto"), 3);
    assert_eq!(config.warming.base_ttl("price"), Duration::from_secs(60));
}

#[test]
fn missing_files_fall_back_to_preset() {
    let dir = TempDir::new().unwrap();
    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
            .unwrap();
    assert_eq!(
        manager.config().tiers.l1_max_size,
        CacheSystemConfig::for_test().tiers.l1_max_size
    );
}

#[test]
fn invalid_values_are_rejected_at_load() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "tiercache.toml",
        r#"
[warming]
pattern_threshold = 1.5
"#,
    );

    let result =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
    assert!(matches!(
        result,
        Err(ConfigurationError::InvalidValue { .. })
    ));
}

#[test]
fn malformed_toml_is_a_load_error() {
    let dir = TempDir::new().unwrap();
    write(&dir, "tiercache.toml", "[tiers\nl1_max_size = ");

    let result =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
    assert!(matches!(result, Err(ConfigurationError::LoadError { .. })));
}

#[test]
fn redacted_url_hides_password() {
    let mut config = CacheSystemConfig::default();
    config.backing_store.password = Some("hunter2".to_string());

    assert!(config.backing_store.connection_url().contains("hunter2"));
    assert!(!config.backing_store.redacted_url().contains("hunter2"));
}

#[test]
fn backoff_grows_and_caps() {
    let config = CacheSystemConfig::for_test().backing_store;
    assert_eq!(config.backoff_for(1), Duration::from_millis(10));
    assert_eq!(config.backoff_for(2), Duration::from_millis(20));
    assert_eq!(config.backoff_for(3), Duration::from_millis(40));
    assert_eq!(config.backoff_for(10), Duration::from_millis(100));
}

#[cfg(feature = "redis-store")]
#[test]
fn malformed_address_fails_cache_construction() {
    use tiercache_core::{CacheError, ResilientCache};

    let mut config = CacheSystemConfig::for_test();
    config.backing_store.host = "bad host/with spaces".to_string();

    let result = ResilientCache::from_config(&config);
    assert!(matches!(
        result,
        Err(CacheError::Configuration(ConfigurationError::InvalidAddress { .. }))
    ));
}

#[cfg(feature = "redis-store")]
#[test]
fn invalid_configuration_fails_cache_construction() {
    use tiercache_core::{CacheError, ResilientCache};

    let mut config = CacheSystemConfig::for_test();
    config.tiers.l1_max_size = 0;

    assert!(matches!(
        ResilientCache::from_config(&config),
        Err(CacheError::Configuration(_))
    ));
}
