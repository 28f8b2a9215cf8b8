//! Configuration loader with layered sources.

use crate::AppConfig;
use conveyor_core::ConveyorError;
use config::{Config, ConfigError, Environment, File};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides, not committed
    /// 4. Environment variables with `CONVEYOR__` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, ConveyorError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ConveyorError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), ConveyorError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, ConveyorError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = std::env::var("CONVEYOR_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        let default_path = format!("{config_dir}/default.toml");
        if Path::new(&default_path).exists() {
            debug!("Loading default config from: {}", default_path);
            builder = builder.add_source(File::with_name(&default_path).required(false));
        }

        let env_path = format!("{config_dir}/{environment}.toml");
        if Path::new(&env_path).exists() {
            debug!("Loading environment config from: {}", env_path);
            builder = builder.add_source(File::with_name(&env_path).required(false));
        }

        let local_path = format!("{config_dir}/local.toml");
        if Path::new(&local_path).exists() {
            debug!("Loading local config from: {}", local_path);
            builder = builder.add_source(File::with_name(&local_path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("CONVEYOR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_conveyor_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_conveyor_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Validates the configuration.
    fn validate_config(config: &AppConfig) -> Result<(), ConveyorError> {
        if config.store.url.is_empty() {
            return Err(ConveyorError::configuration("store URL is required"));
        }
        if config.coordination.url.is_empty() {
            return Err(ConveyorError::configuration("coordination URL is required"));
        }
        if config.worker.queues.is_empty() {
            return Err(ConveyorError::configuration(
                "at least one worker queue must be configured",
            ));
        }
        if config.scheduler.leader_lock_ttl_secs * 1000 <= config.scheduler.tick_interval_ms {
            return Err(ConveyorError::configuration(
                "scheduler leader_lock_ttl_secs must exceed tick_interval_ms",
            ));
        }
        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_conveyor_error(err: ConfigError) -> ConveyorError {
    ConveyorError::configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppConfig;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_empty_store_url() {
        let mut config = AppConfig::default();
        config.store.url = String::new();
        config.coordination.url = "redis://localhost:6379".to_string();
        assert!(ConfigLoader::validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_queues() {
        let mut config = AppConfig::default();
        config.store.url = "postgres://localhost/conveyor".to_string();
        config.worker.queues.clear();
        assert!(ConfigLoader::validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let mut config = AppConfig::default();
        config.store.url = "postgres://localhost/conveyor".to_string();
        assert!(ConfigLoader::validate_config(&config).is_ok());
    }
}
