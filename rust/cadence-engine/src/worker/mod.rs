//! Embedded job runner.
//!
//! Polls a [`JobQueue`] in-process and hands due jobs to a [`JobHandler`].
//! Stands in for an external job-execution service in single-node
//! deployments and tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backends::{JobQueue, ScheduledJob};
use crate::clock::Clock;
use crate::error::BackendError;

/// Executes one claimed job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handle `job`. Success completes the job; an error puts it back for
    /// another attempt.
    async fn handle(&self, job: &ScheduledJob) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: JobHandler + ?Sized> JobHandler for Arc<T> {
    async fn handle(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        (**self).handle(job).await
    }
}

/// Runner tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Delay between polls of the queue.
    pub poll_interval_ms: u64,
    /// Maximum jobs claimed per poll.
    pub batch_size: usize,
    /// Maximum jobs handled at once.
    pub max_concurrent: usize,
    /// Delay before a failed job is retried.
    pub retry_delay_secs: u64,
    /// Attempts after which a failing job is dropped.
    pub max_attempts: u32,
    /// How long a claimed job stays invisible to other polls. A job still
    /// claimed when this runs out (its worker died) is delivered again.
    pub lease_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 32,
            max_concurrent: 8,
            retry_delay_secs: 30,
            max_attempts: 5,
            lease_secs: 300,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> chrono::Duration {
        seconds(self.retry_delay_secs)
    }

    #[must_use]
    pub fn lease(&self) -> chrono::Duration {
        seconds(self.lease_secs)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_else(|| chrono::Duration::days(1))
}

/// Counters for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub claimed: usize,
    pub succeeded: usize,
    /// Failed jobs put back for retry.
    pub retried: usize,
    /// Failed jobs dropped, either out of attempts or superseded by a newer
    /// job under the same key. A panicked job is counted here too; its lease
    /// runs out and it is delivered again.
    pub dropped: usize,
}

/// In-process runner driving a [`JobQueue`].
pub struct EmbeddedRunner<Q, H> {
    queue: Arc<Q>,
    handler: Arc<H>,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    permits: Arc<Semaphore>,
}

impl<Q, H> EmbeddedRunner<Q, H>
where
    Q: JobQueue + 'static,
    H: JobHandler + 'static,
{
    /// Create a runner.
    pub fn new(
        queue: Arc<Q>,
        handler: Arc<H>,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
    ) -> Self {
        tracing::info!(
            poll_interval_ms = config.poll_interval_ms,
            batch_size = config.batch_size,
            max_concurrent = config.max_concurrent,
            lease_secs = config.lease_secs,
            "Creating embedded runner"
        );
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            queue,
            handler,
            clock,
            config,
            permits,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Poll until `cancel` fires. Jobs in flight when it fires finish first.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Embedded runner started");
        loop {
            match self.run_once().await {
                Ok(report) if report.claimed > 0 => {
                    tracing::debug!(
                        claimed = report.claimed,
                        succeeded = report.succeeded,
                        retried = report.retried,
                        dropped = report.dropped,
                        "Poll complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to poll job queue"),
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Embedded runner cancelled");
                    break;
                }
                () = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// Claim and handle every job due now, waiting for all of them.
    pub async fn run_once(&self) -> Result<PollReport, BackendError> {
        let now = self.clock.now();
        let jobs = self
            .queue
            .take_due(now, self.config.batch_size.max(1), now + self.config.lease())
            .await?;

        let mut report = PollReport {
            claimed: jobs.len(),
            ..PollReport::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for job in jobs {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let handler = Arc::clone(&self.handler);
            tasks.spawn(async move {
                let result = handler.handle(&job).await;
                drop(permit);
                (job, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (job, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Job task panicked");
                    report.dropped += 1;
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    report.succeeded += 1;
                    self.complete(&job).await;
                }
                Err(e) => match self.retry(&job, &e).await {
                    Ok(true) => report.retried += 1,
                    Ok(false) => report.dropped += 1,
                    Err(release_err) => {
                        tracing::error!(error = %release_err, "Failed to release job for retry");
                        report.dropped += 1;
                    }
                },
            }
        }

        Ok(report)
    }

    /// Delete a handled job. A failure only means the job is delivered
    /// again after its lease, where it is skipped as a duplicate.
    async fn complete(&self, job: &ScheduledJob) {
        match self.queue.complete(job).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(job_key = %job.key, "Job re-armed while running"),
            Err(e) => tracing::warn!(job_key = %job.key, error = %e, "Failed to complete job"),
        }
    }

    async fn retry(&self, job: &ScheduledJob, error: &anyhow::Error) -> Result<bool, BackendError> {
        let attempt = job.attempts + 1;
        if attempt >= self.config.max_attempts {
            tracing::error!(
                job_key = %job.key,
                attempts = attempt,
                error = %error,
                "Job failed, giving up"
            );
            self.queue.complete(job).await?;
            return Ok(false);
        }

        let retry_at = self.clock.now() + self.config.retry_delay();
        let released = self.queue.release(job, retry_at).await?;
        if released {
            tracing::warn!(
                job_key = %job.key,
                attempts = attempt,
                retry_at = %retry_at,
                error = %error,
                "Job failed, retrying"
            );
        } else {
            tracing::warn!(job_key = %job.key, error = %error, "Job failed but was superseded");
        }
        Ok(released)
    }
}

impl<Q, H> std::fmt::Debug for EmbeddedRunner<Q, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
