//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Sources are layered lowest to highest priority:
//!
//! 1. Environment preset (`CacheSystemConfig::for_test()` / `for_development()` / `default()`)
//! 2. `tiercache.toml` in the configuration directory
//! 3. `tiercache.{environment}.toml` in the configuration directory
//! 4. `TIERCACHE__SECTION__KEY` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::CacheSystemConfig;
use ::config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE: &str = "tiercache.toml";
const ENV_PREFIX: &str = "TIERCACHE";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: CacheSystemConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for tests that must not depend on process-wide environment variables.
    /// An explicitly supplied directory must exist; the default directory is optional.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        if explicit && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            backing_store = %config.backing_store.redacted_url(),
            l1_max_size = config.tiers.l1_max_size,
            breaker_threshold = config.circuit_breaker.failure_threshold,
            "Cache configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build_config(config_directory: &Path, environment: &str) -> ConfigResult<CacheSystemConfig> {
        let preset = Self::preset_for(environment);
        let preset_source = Config::try_from(&preset)
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        let env_file = config_directory.join(format!("tiercache.{environment}.toml"));

        Config::builder()
            .add_source(preset_source)
            .add_source(File::from(config_directory.join(BASE_FILE)).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|built| built.try_deserialize::<CacheSystemConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    /// Environment preset used as the lowest configuration layer
    pub fn preset_for(environment: &str) -> CacheSystemConfig {
        match environment {
            "test" => CacheSystemConfig::for_test(),
            "development" => CacheSystemConfig::for_development(),
            _ => CacheSystemConfig::default(),
        }
    }

    /// Get current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("TIERCACHE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("TIERCACHE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &CacheSystemConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}
