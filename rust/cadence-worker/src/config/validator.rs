//! Configuration validation for the cadence worker.
//!
//! Every problem found is collected so the operator sees them all at once.

use cadence_engine::RunnerConfig;
use tracing_subscriber::EnvFilter;

use super::error::{ConfigResult, ConfigurationError};
use super::{LoggingConfig, StorageConfig, WorkerConfig};

/// Longest accepted retry delay (one week).
pub const MAX_RETRY_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

/// Validates a loaded [`WorkerConfig`].
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire worker configuration.
    pub fn validate(config: &WorkerConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();
        errors.extend(Self::runner_errors(&config.runner));
        errors.extend(Self::storage_errors(&config.storage));
        errors.extend(Self::logging_errors(&config.logging));
        ConfigurationError::collect(errors)
    }

    /// Validate runner tuning.
    pub fn validate_runner(runner: &RunnerConfig) -> ConfigResult<()> {
        ConfigurationError::collect(Self::runner_errors(runner))
    }

    fn runner_errors(runner: &RunnerConfig) -> Vec<ConfigurationError> {
        let zero_settings = [
            ("poll_interval_ms", runner.poll_interval_ms == 0),
            ("batch_size", runner.batch_size == 0),
            ("max_concurrent", runner.max_concurrent == 0),
            ("max_attempts", runner.max_attempts == 0),
            ("lease_secs", runner.lease_secs == 0),
        ];

        let mut errors: Vec<_> = zero_settings
            .into_iter()
            .filter(|(_, is_zero)| *is_zero)
            .map(|(setting, _)| ConfigurationError::runner_out_of_range(setting, 0, "at least 1"))
            .collect();

        if runner.retry_delay_secs > MAX_RETRY_DELAY_SECS {
            errors.push(ConfigurationError::runner_out_of_range(
                "retry_delay_secs",
                runner.retry_delay_secs,
                format!("at most {MAX_RETRY_DELAY_SECS}"),
            ));
        }

        errors
    }

    fn storage_errors(storage: &StorageConfig) -> Vec<ConfigurationError> {
        let files = [
            ("jobs_db", &storage.jobs_db, "scheduled jobs"),
            ("store_file", &storage.store_file, "templates, occurrences and reminders"),
        ];

        let mut errors: Vec<_> = files
            .into_iter()
            .filter(|(_, path, _)| path.as_os_str().is_empty())
            .map(|(setting, _, holds)| ConfigurationError::storage_path_missing(setting, holds))
            .collect();

        if storage.jobs_db_path() == storage.store_path() {
            errors.push(ConfigurationError::StoragePathsCollide {
                path: storage.store_path(),
            });
        }

        errors
    }

    fn logging_errors(logging: &LoggingConfig) -> Vec<ConfigurationError> {
        match EnvFilter::try_new(&logging.level) {
            Ok(_) => Vec::new(),
            Err(e) => vec![ConfigurationError::InvalidLogFilter {
                directive: logging.level.clone(),
                reason: e.to_string(),
            }],
        }
    }
}
