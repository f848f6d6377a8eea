//! Worker assembly: backend, store, schedulers and runner.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use cadence_engine::model::RecurrenceDescriptor;
use cadence_engine::notifier::TracingNotifier;
use cadence_engine::{
    Clock, EmbeddedRunner, JobDispatcher, PollReport, RecurrenceCalculator, RecurrenceScheduler,
    ReminderScheduler, SqliteJobBackend,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::logging::OpTimer;
use crate::store::JsonFileStore;

pub type WorkerScheduler = RecurrenceScheduler<Arc<SqliteJobBackend>, Arc<JsonFileStore>>;
pub type WorkerReminders =
    ReminderScheduler<Arc<SqliteJobBackend>, Arc<JsonFileStore>, TracingNotifier>;
type WorkerDispatcher = JobDispatcher<Arc<SqliteJobBackend>, Arc<JsonFileStore>, TracingNotifier>;

/// A fully wired worker.
pub struct Worker {
    backend: Arc<SqliteJobBackend>,
    store: Arc<JsonFileStore>,
    scheduler: Arc<WorkerScheduler>,
    reminders: Arc<WorkerReminders>,
    runner: EmbeddedRunner<SqliteJobBackend, WorkerDispatcher>,
    reconcile_on_start: bool,
}

impl Worker {
    /// Open storage and wire the schedulers to the embedded runner.
    pub async fn build(config: &WorkerConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let data_dir = &config.storage.data_dir;
        if !data_dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(data_dir)
                .await
                .with_context(|| format!("failed to create {}", data_dir.display()))?;
        }

        let timer = OpTimer::new("backend", "open");
        let backend = SqliteJobBackend::new(config.storage.jobs_db_path()).await;
        timer.finish_with_result(backend.as_ref());
        let backend = Arc::new(backend?);

        let timer = OpTimer::new("store", "open");
        let store = JsonFileStore::open(config.storage.store_path()).await;
        timer.finish_with_result(store.as_ref());
        let store = Arc::new(store?);

        let scheduler = Arc::new(RecurrenceScheduler::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let reminders = Arc::new(ReminderScheduler::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            TracingNotifier,
            Arc::clone(&clock),
        ));
        let dispatcher = JobDispatcher::new(Arc::clone(&scheduler), Arc::clone(&reminders));
        let runner = EmbeddedRunner::new(
            Arc::clone(&backend),
            Arc::new(dispatcher),
            clock,
            config.runner.clone(),
        );

        Ok(Self {
            backend,
            store,
            scheduler,
            reminders,
            runner,
            reconcile_on_start: config.reconcile_on_start,
        })
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<SqliteJobBackend> {
        &self.backend
    }

    #[must_use]
    pub fn store(&self) -> &Arc<JsonFileStore> {
        &self.store
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<WorkerScheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn reminders(&self) -> &Arc<WorkerReminders> {
        &self.reminders
    }

    /// Process one batch of due jobs.
    pub async fn poll_once(&self) -> anyhow::Result<PollReport> {
        Ok(self.runner.run_once().await?)
    }

    /// Reconcile (when enabled) and poll until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        if self.reconcile_on_start {
            let timer = OpTimer::new("scheduler", "reconcile");
            let report = self.scheduler.reconcile().await;
            timer.finish_with_result(report.as_ref());
            let report = report?;
            tracing::info!(
                armed = report.armed,
                finished = report.finished,
                failed = report.failed,
                "Recurring templates reconciled"
            );
        }

        self.runner.run(shutdown).await;
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("jobs_db", &self.backend.path())
            .field("store", &self.store.path())
            .field("reconcile_on_start", &self.reconcile_on_start)
            .finish_non_exhaustive()
    }
}

/// Read a recurrence descriptor from a JSON file.
pub async fn load_descriptor(path: &Path) -> anyhow::Result<RecurrenceDescriptor> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid descriptor in {}", path.display()))
}

/// Up to `count` upcoming occurrences of `descriptor`, starting from `from`.
pub fn preview(
    descriptor: &RecurrenceDescriptor,
    from: DateTime<Utc>,
    count: usize,
) -> anyhow::Result<Vec<DateTime<Utc>>> {
    if let Err(e) = descriptor.validate() {
        anyhow::bail!("invalid recurrence: {e}");
    }
    Ok(RecurrenceCalculator::new().preview(descriptor, from, count))
}
