use config::{Config, Environment, File as ConfigFile};
use hdsync_storage::{RetentionPolicy, DEFAULT_SECURITY_PARAMETER};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::errors::{Result, WalletError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Runtime settings, from an optional TOML file overlaid with `HDSYNC_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub keystore_dir: PathBuf,
    pub security_parameter: usize,
    pub store_backend: StoreBackend,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/hdsync"),
            keystore_dir: PathBuf::from("./keys"),
            security_parameter: DEFAULT_SECURITY_PARAMETER,
            store_backend: StoreBackend::Sled,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl SyncConfig {
    /// Load settings. A path given explicitly must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(WalletError::Config(config::ConfigError::NotFound(format!(
                    "configuration file {}",
                    path.display()
                ))));
            }
            builder = builder.add_source(ConfigFile::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("HDSYNC"));
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.security_parameter)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &SyncConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let installed = match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    installed.map_err(|err| WalletError::Logging(err.to_string()))
}
