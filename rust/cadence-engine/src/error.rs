//! Error types for the scheduling engine.
//!
//! Only job-backend and store I/O produce real errors. Stale templates and
//! duplicate firings are reported as [`FiringOutcome`](crate::FiringOutcome)
//! variants, and the calculator never fails.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a job backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("job backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid job payload: {0}")]
    Payload(String),
}

/// Invalid recurrence descriptor supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("recurrence interval must be at least 1")]
    InvalidInterval,

    #[error("day of month {0} is outside 1-31")]
    InvalidDayOfMonth(u32),

    #[error("custom recurrence requires a cron expression")]
    MissingExpression,

    #[error("end date {end} is before start date {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Errors surfaced by the schedulers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job backend could not be reached. The caller may retry; the
    /// previous commitment on the descriptor was left untouched.
    #[error("job backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(#[from] DescriptorError),

    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    /// The template kept changing underneath a firing. The firing committed
    /// nothing and can be redelivered.
    #[error("template {0} changed during firing")]
    Conflict(Uuid),
}

impl SchedulerError {
    /// Whether retrying the same call can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Store(_) | Self::Conflict(_)
        )
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

impl From<BackendError> for SchedulerError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => Self::BackendUnavailable(msg),
            BackendError::Payload(msg) => {
                Self::Store(anyhow::anyhow!("invalid job payload: {msg}"))
            }
        }
    }
}

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
