//! Recurrence chain persisted in the `SQLite` job backend.

#![cfg(feature = "sqlite-backend")]

mod common;

use std::sync::Arc;

use cadence_engine::backends::{JobKey, JobQueue, SqliteJobBackend};
use cadence_engine::clock::{Clock, ManualClock};
use cadence_engine::dispatch::JobDispatcher;
use cadence_engine::model::{RecurrenceDescriptor, TaskTemplate, Template};
use cadence_engine::notifier::TracingNotifier;
use cadence_engine::reminders::ReminderScheduler;
use cadence_engine::scheduler::RecurrenceScheduler;
use cadence_engine::store::{InMemoryStore, RecurrenceStore};
use cadence_engine::worker::{EmbeddedRunner, RunnerConfig};
use chrono::{Duration, Weekday};
use common::at;
use tempfile::TempDir;

#[tokio::test]
async fn test_weekly_chain_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");
    let clock = Arc::new(ManualClock::new(at(2024, 1, 1)));
    let shared_clock: Arc<dyn Clock> = Arc::<ManualClock>::clone(&clock);
    let store = Arc::new(InMemoryStore::new());

    let template_id = {
        let backend = Arc::new(SqliteJobBackend::new(&db_path).await.unwrap());
        let scheduler = RecurrenceScheduler::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&shared_clock),
        );
        let mut template: Template = TaskTemplate::new("user-1", "Sprint review", at(2024, 1, 1))
            .with_recurrence(
                RecurrenceDescriptor::weekly(at(2024, 1, 1))
                    .with_interval(2)
                    .with_day_of_week(Weekday::Fri),
            )
            .into();
        scheduler.schedule(&mut template).await.unwrap();
        template.id()
    };

    // A fresh handle sees the job armed by the first one.
    let backend = Arc::new(SqliteJobBackend::new(&db_path).await.unwrap());
    let job = backend
        .pending(&JobKey::recurring(template_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.run_at, at(2024, 1, 5));

    let (_, runner) = wire(&backend, &store, &shared_clock);

    clock.set(at(2024, 1, 5));
    assert_eq!(runner.run_once().await.unwrap().succeeded, 1);

    assert_eq!(store.instances_of(template_id).await.unwrap().len(), 1);
    let job = backend
        .pending(&JobKey::recurring(template_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.run_at, at(2024, 1, 19));
}

type SqliteScheduler = RecurrenceScheduler<Arc<SqliteJobBackend>, Arc<InMemoryStore>>;
type SqliteDispatcher =
    JobDispatcher<Arc<SqliteJobBackend>, Arc<InMemoryStore>, TracingNotifier>;

fn wire(
    backend: &Arc<SqliteJobBackend>,
    store: &Arc<InMemoryStore>,
    clock: &Arc<dyn Clock>,
) -> (Arc<SqliteScheduler>, EmbeddedRunner<SqliteJobBackend, SqliteDispatcher>) {
    let scheduler = Arc::new(RecurrenceScheduler::new(
        Arc::clone(backend),
        Arc::clone(store),
        Arc::clone(clock),
    ));
    let reminders = Arc::new(ReminderScheduler::new(
        Arc::clone(backend),
        Arc::clone(store),
        TracingNotifier,
        Arc::clone(clock),
    ));
    let runner = EmbeddedRunner::new(
        Arc::clone(backend),
        Arc::new(JobDispatcher::new(Arc::clone(&scheduler), reminders)),
        Arc::clone(clock),
        RunnerConfig::default(),
    );
    (scheduler, runner)
}

/// Schedules a Monday review, then claims its Jan 8 job the way a runner
/// would and drops the handle before anything is committed.
async fn crash_after_claim(
    db_path: &std::path::Path,
    store: &Arc<InMemoryStore>,
    clock: &Arc<ManualClock>,
) -> uuid::Uuid {
    let shared_clock: Arc<dyn Clock> = Arc::<ManualClock>::clone(clock);
    let backend = Arc::new(SqliteJobBackend::new(db_path).await.unwrap());
    let (scheduler, _) = wire(&backend, store, &shared_clock);

    let mut template: Template = TaskTemplate::new("user-1", "Weekly review", at(2024, 1, 1))
        .with_recurrence(
            RecurrenceDescriptor::weekly(at(2024, 1, 1)).with_day_of_week(Weekday::Mon),
        )
        .into();
    scheduler.schedule(&mut template).await.unwrap();

    clock.set(at(2024, 1, 8));
    let lease_until = at(2024, 1, 8) + RunnerConfig::default().lease();
    let claimed = backend.take_due(at(2024, 1, 8), 10, lease_until).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].run_at, at(2024, 1, 8));

    template.id()
}

#[tokio::test]
async fn test_claim_lost_in_crash_is_restored_by_reconcile() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");
    let clock = Arc::new(ManualClock::new(at(2024, 1, 1)));
    let store = Arc::new(InMemoryStore::new());
    let template_id = crash_after_claim(&db_path, &store, &clock).await;

    // Restart a minute later.
    clock.advance(Duration::minutes(1));
    let shared_clock: Arc<dyn Clock> = Arc::<ManualClock>::clone(&clock);
    let backend = Arc::new(SqliteJobBackend::new(&db_path).await.unwrap());
    let (scheduler, runner) = wire(&backend, &store, &shared_clock);

    let report = scheduler.reconcile().await.unwrap();
    assert_eq!(report.armed, 1);
    let key = JobKey::recurring(template_id);
    assert_eq!(backend.pending(&key).await.unwrap().unwrap().run_at, at(2024, 1, 8));

    assert_eq!(runner.run_once().await.unwrap().succeeded, 1);
    assert_eq!(store.instances_of(template_id).await.unwrap().len(), 1);
    assert_eq!(backend.pending(&key).await.unwrap().unwrap().run_at, at(2024, 1, 15));
}

#[tokio::test]
async fn test_claim_lost_in_crash_returns_after_lease() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");
    let clock = Arc::new(ManualClock::new(at(2024, 1, 1)));
    let store = Arc::new(InMemoryStore::new());
    let template_id = crash_after_claim(&db_path, &store, &clock).await;

    let shared_clock: Arc<dyn Clock> = Arc::<ManualClock>::clone(&clock);
    let backend = Arc::new(SqliteJobBackend::new(&db_path).await.unwrap());
    let (_, runner) = wire(&backend, &store, &shared_clock);

    // Still leased to the dead worker.
    clock.advance(Duration::minutes(1));
    assert_eq!(runner.run_once().await.unwrap().claimed, 0);

    clock.set(at(2024, 1, 8) + RunnerConfig::default().lease());
    let report = runner.run_once().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(store.instances_of(template_id).await.unwrap().len(), 1);
    let key = JobKey::recurring(template_id);
    assert_eq!(backend.pending(&key).await.unwrap().unwrap().run_at, at(2024, 1, 15));
}
