//! Configuration loader with layered sources.

use crate::validation::{format_validation_errors, ConfigValidationError, ConfigValidator};
use crate::AppConfig;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default prefix of environment overrides.
pub const ENV_PREFIX: &str = "BAZARUTO";

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The merged configuration failed validation
    #[error("{}", format_validation_errors(.0))]
    Invalid(Vec<ConfigValidationError>),
}

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `.env` in the working directory, if present
    /// 2. `config/default.toml` - Default values
    /// 3. `config/{environment}.toml` - Environment-specific overrides
    /// 4. `config/local.toml` - Local overrides
    /// 5. Environment variables such as `BAZARUTO__JOBS__WORKER__CONCURRENCY=8`
    ///
    /// The environment name comes from `BAZARUTO_ENVIRONMENT` (default `development`).
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::with_env_prefix(config_dir, ENV_PREFIX)
    }

    /// Like [`new`](Self::new) with a different environment variable prefix.
    pub fn with_env_prefix(
        config_dir: impl Into<PathBuf>,
        env_prefix: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir.into();
        let env_prefix = env_prefix.into();
        let config = load_config(&config_dir, &env_prefix)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
            env_prefix,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ConfigError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk; the previous value is kept on error.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let new_config = load_config(&self.config_dir, &self.env_prefix)?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Gets a specific configuration value by dotted key path.
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

fn load_config(config_dir: &Path, env_prefix: &str) -> Result<AppConfig, ConfigError> {
    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file found or error loading it: {}", e);
    }

    let environment = std::env::var(format!("{env_prefix}_ENVIRONMENT"))
        .unwrap_or_else(|_| "development".to_string());
    info!(environment = %environment, dir = %config_dir.display(), "Loading configuration");

    let mut builder = Config::builder();
    for name in ["default", environment.as_str(), "local"] {
        let path = config_dir.join(format!("{name}.toml"));
        if path.exists() {
            debug!("Loading config from: {}", path.display());
            builder = builder.add_source(File::from(path).required(false));
        }
    }

    builder = builder
        .set_override("app.environment", environment.as_str())?
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("jobs.worker.queues")
                .try_parsing(true),
        );

    let app_config: AppConfig = builder.build()?.try_deserialize()?;
    ConfigValidator::validate(&app_config).map_err(ConfigError::Invalid)?;
    Ok(app_config)
}
