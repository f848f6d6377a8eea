//! Problems the worker reports about its configuration.
//!
//! Each variant names the offending setting together with the environment
//! variable that overrides it.

use std::path::PathBuf;

use thiserror::Error;

use super::ENV_PREFIX;

/// A rejected worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A runner tuning value outside its accepted range.
    #[error("runner.{setting} is {value} but must be {requirement} (set {env_var})")]
    RunnerOutOfRange {
        setting: &'static str,
        value: String,
        requirement: String,
        env_var: String,
    },

    /// A storage file name was left empty.
    #[error("storage.{setting} is empty; it names the file holding {holds} (set {env_var})")]
    StoragePathMissing {
        setting: &'static str,
        holds: &'static str,
        env_var: String,
    },

    /// The job database and the template store resolve to one file.
    #[error(
        "storage.jobs_db and storage.store_file both resolve to {}; give them different names",
        .path.display()
    )]
    StoragePathsCollide { path: PathBuf },

    /// `logging.level` is not a valid tracing filter.
    #[error(
        "logging.level '{directive}' is not a valid filter: {reason} \
         (use e.g. 'info' or 'cadence_engine=debug,info')"
    )]
    InvalidLogFilter { directive: String, reason: String },

    #[error("{} configuration problems:{}", .0.len(), numbered(.0))]
    Multiple(Vec<ConfigurationError>),
}

impl ConfigurationError {
    /// `runner.<setting>` holds `value`, which violates `requirement`.
    #[must_use]
    pub fn runner_out_of_range(
        setting: &'static str,
        value: impl ToString,
        requirement: impl Into<String>,
    ) -> Self {
        Self::RunnerOutOfRange {
            setting,
            value: value.to_string(),
            requirement: requirement.into(),
            env_var: env_var("runner", setting),
        }
    }

    /// `storage.<setting>` is empty; it should name the file holding `holds`.
    #[must_use]
    pub fn storage_path_missing(setting: &'static str, holds: &'static str) -> Self {
        Self::StoragePathMissing {
            setting,
            holds,
            env_var: env_var("storage", setting),
        }
    }

    /// `Ok` when there is nothing to report, the problem itself when there is
    /// one, [`Self::Multiple`] otherwise.
    pub fn collect(mut errors: Vec<ConfigurationError>) -> ConfigResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Number of problems reported.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Override variable for `<section>.<setting>`, e.g. `CADENCE__RUNNER__BATCH_SIZE`.
fn env_var(section: &str, setting: &str) -> String {
    format!(
        "{ENV_PREFIX}__{}__{}",
        section.to_uppercase(),
        setting.to_uppercase()
    )
}

fn numbered(errors: &[ConfigurationError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, err)| format!("\n  {}. {err}", i + 1))
        .collect()
}
