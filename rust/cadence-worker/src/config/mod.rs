//! Configuration management for the cadence worker.
//!
//! Configuration is layered from built-in defaults, an optional
//! `config/cadence.{toml,yaml,json}`, an explicit file passed on the command
//! line and finally `CADENCE__*` environment variables:
//!
//! ```rust,ignore
//! use cadence_worker::config::WorkerConfig;
//!
//! // CADENCE__RUNNER__BATCH_SIZE=64 overrides runner.batch_size
//! let config = WorkerConfig::load(None)?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::path::{Path, PathBuf};

use anyhow::Context;
use cadence_engine::RunnerConfig;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CADENCE";

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Embedded runner tuning.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Where jobs and templates are persisted.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Re-arm every recurring template before the runner starts.
    #[serde(default = "default_reconcile_on_start")]
    pub reconcile_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            reconcile_on_start: default_reconcile_on_start(),
        }
    }
}

impl WorkerConfig {
    /// Load and validate configuration.
    ///
    /// `path` is an explicit config file that must exist. Use
    /// [`Self::load_unchecked`] to skip validation.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(path)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(path: Option<&Path>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .set_default("reconcile_on_start", default_reconcile_on_start())?
            .add_source(config::File::with_name("config/cadence").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration sources")?;

        config
            .try_deserialize()
            .context("failed to deserialize configuration")
    }
}

/// Storage locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that relative paths below are resolved against.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// `SQLite` database holding scheduled jobs.
    #[serde(default = "default_jobs_db")]
    pub jobs_db: PathBuf,
    /// JSON document holding templates, occurrences and reminders.
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            jobs_db: default_jobs_db(),
            store_file: default_store_file(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn jobs_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.jobs_db)
    }

    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store_file)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_jobs_db() -> PathBuf {
    PathBuf::from("jobs.db")
}

fn default_store_file() -> PathBuf {
    PathBuf::from("store.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconcile_on_start() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_paths_resolve_against_data_dir() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/var/lib/cadence"),
            ..StorageConfig::default()
        };
        assert_eq!(storage.jobs_db_path(), PathBuf::from("/var/lib/cadence/jobs.db"));
        assert_eq!(storage.store_path(), PathBuf::from("/var/lib/cadence/store.json"));
    }

    #[test]
    fn test_absolute_store_file_wins() {
        let storage = StorageConfig {
            store_file: PathBuf::from("/tmp/cadence.json"),
            ..StorageConfig::default()
        };
        assert_eq!(storage.store_path(), PathBuf::from("/tmp/cadence.json"));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"runner": {"batch_size": 4}}"#).unwrap();
        assert_eq!(config.runner.batch_size, 4);
        assert_eq!(config.runner.max_concurrent, RunnerConfig::default().max_concurrent);
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.logging.level, "info");
    }
}
