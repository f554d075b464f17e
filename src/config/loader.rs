//! Configuration Loader
//!
//! Layers configuration sources in precedence order:
//!
//! 1. `{config_dir}/game_cache.toml` (optional)
//! 2. `{config_dir}/game_cache.{environment}.toml` (optional)
//! 3. Environment variables prefixed `GAME_CACHE_`, nested with `__`
//!    (e.g. `GAME_CACHE_STORE__URL`)

use super::error::ConfigResult;
use super::GameCacheConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const CONFIG_BASENAME: &str = "game_cache";
const ENV_PREFIX: &str = "GAME_CACHE";

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: GameCacheConfig,
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
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading cache layer configuration"
        );

        let config: GameCacheConfig = Config::builder()
            .add_source(
                File::from(config_directory.join(format!("{CONFIG_BASENAME}.toml")))
                    .required(false),
            )
            .add_source(
                File::from(config_directory.join(format!("{CONFIG_BASENAME}.{environment}.toml")))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        debug!(
            config = %Self::sanitize_config_for_logging(&config),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GameCacheConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials in the store URL masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn sanitize_config_for_logging(config: &GameCacheConfig) -> serde_json::Value {
        let mut value = serde_json::json!(config);
        if let Some(url) = value.pointer_mut("/store/url") {
            if let Some(raw) = url.as_str() {
                *url = serde_json::Value::String(crate::store::redact_url(raw));
            }
        }
        value
    }

    /// Detect current environment: GAME_ENV || APP_ENV || 'development'
    fn detect_environment() -> String {
        env::var("GAME_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
