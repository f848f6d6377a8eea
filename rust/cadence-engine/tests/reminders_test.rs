//! Reminder scheduling and delivery.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cadence_engine::backends::{InMemoryJobBackend, JobKey, JobPayload};
use cadence_engine::clock::ManualClock;
use cadence_engine::error::SchedulerError;
use cadence_engine::model::{
    Reminder, ReminderState, TaskStatus, TaskTemplate, Template, TemplateId,
};
use cadence_engine::notifier::RecordingNotifier;
use cadence_engine::reminders::{ReminderOutcome, ReminderScheduler};
use cadence_engine::store::{InMemoryStore, RecurrenceStore};
use chrono::Duration;
use common::{at, Harness};
use uuid::Uuid;

async fn open_task(h: &Harness) -> TaskTemplate {
    let task = TaskTemplate::new("user-1", "File taxes", at(2024, 3, 1));
    h.store.save_template(&task.clone().into()).await.unwrap();
    task
}

#[tokio::test]
async fn test_past_reminder_fires_inline() {
    let h = Harness::new(at(2024, 3, 10));
    let task = open_task(&h).await;
    let mut reminder = Reminder::new(task.id, "user-1", at(2024, 3, 9), "Taxes due")
        .with_body("Deadline is tomorrow");

    let outcome = h.reminders.schedule_reminder(&mut reminder).await.unwrap();

    assert_eq!(outcome, ReminderOutcome::Delivered);
    assert!(reminder.is_sent());
    assert!(h.backend.calls().is_empty());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, "user-1");
    assert_eq!(sent[0].subject, "Taxes due");
    assert_eq!(sent[0].body, "Deadline is tomorrow");

    let stored = h.store.reminder(reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.state, ReminderState::Sent);
}

#[tokio::test]
async fn test_future_reminder_registers_job() {
    let h = Harness::new(at(2024, 3, 1));
    let task = open_task(&h).await;
    let mut reminder = Reminder::new(task.id, "user-1", at(2024, 3, 14), "Taxes due");

    let outcome = h.reminders.schedule_reminder(&mut reminder).await.unwrap();

    assert_eq!(outcome, ReminderOutcome::Scheduled { run_at: at(2024, 3, 14) });
    let job = h.backend.job(&JobKey::reminder(reminder.id)).unwrap();
    assert_eq!(job.run_at, at(2024, 3, 14));
    assert_eq!(job.payload, JobPayload::Reminder { reminder_id: reminder.id });
    assert!(h.notifier.sent().is_empty());
    assert!(!h.store.reminder(reminder.id).await.unwrap().unwrap().is_sent());
}

#[tokio::test]
async fn test_duplicate_delivery_notifies_once() {
    let h = Harness::new(at(2024, 3, 1));
    let task = open_task(&h).await;
    let mut reminder = Reminder::new(task.id, "user-1", at(2024, 3, 14), "Taxes due");
    h.reminders.schedule_reminder(&mut reminder).await.unwrap();

    h.clock.set(at(2024, 3, 14));
    let first = h.reminders.fire_reminder(reminder.id).await.unwrap();
    let second = h.reminders.fire_reminder(reminder.id).await.unwrap();

    assert_eq!(first, ReminderOutcome::Delivered);
    assert_eq!(second, ReminderOutcome::AlreadySent);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_completed_task_skips_notification() {
    let h = Harness::new(at(2024, 3, 1));
    let mut task = open_task(&h).await;
    let mut reminder = Reminder::new(task.id, "user-1", at(2024, 3, 14), "Taxes due");
    h.reminders.schedule_reminder(&mut reminder).await.unwrap();

    task.status = TaskStatus::Done;
    task.completed_at = Some(at(2024, 3, 5));
    h.store.save_template(&task.into()).await.unwrap();

    h.clock.set(at(2024, 3, 14));
    let outcome = h.reminders.fire_reminder(reminder.id).await.unwrap();

    assert_eq!(outcome, ReminderOutcome::Skipped);
    assert!(h.notifier.sent().is_empty());
    assert!(h.store.reminder(reminder.id).await.unwrap().unwrap().is_sent());
}

#[tokio::test]
async fn test_reminder_for_deleted_task_is_skipped() {
    let h = Harness::new(at(2024, 3, 10));
    let mut reminder = Reminder::new(Uuid::new_v4(), "user-1", at(2024, 3, 9), "Orphan");

    let outcome = h.reminders.schedule_reminder(&mut reminder).await.unwrap();

    assert_eq!(outcome, ReminderOutcome::Skipped);
    assert!(reminder.is_sent());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_sent_reminder_not_rescheduled() {
    let h = Harness::new(at(2024, 3, 1));
    let task = open_task(&h).await;
    let mut reminder = Reminder::new(task.id, "user-1", at(2024, 3, 14), "Taxes due");
    reminder.mark_sent();

    let outcome = h.reminders.schedule_reminder(&mut reminder).await.unwrap();

    assert_eq!(outcome, ReminderOutcome::AlreadySent);
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_missing_reminder_firing() {
    let h = Harness::new(at(2024, 3, 1));
    let outcome = h.reminders.fire_reminder(Uuid::new_v4()).await.unwrap();
    assert_eq!(outcome, ReminderOutcome::Missing);
}

#[tokio::test]
async fn test_offline_backend_surfaces_error() {
    let h = Harness::new(at(2024, 3, 1));
    let task = open_task(&h).await;
    h.backend.set_available(false);
    let fire_at = at(2024, 3, 1) + Duration::days(1);
    let mut reminder = Reminder::new(task.id, "user-1", fire_at, "Taxes due");

    let err = h.reminders.schedule_reminder(&mut reminder).await.unwrap_err();

    assert!(matches!(err, SchedulerError::BackendUnavailable(_)));
    assert!(h.store.reminder(reminder.id).await.unwrap().is_none());
}

/// Store whose reminder writes can be made to fail.
#[derive(Default)]
struct ReadOnlyReminders {
    inner: InMemoryStore,
    reject_writes: AtomicBool,
}

#[async_trait]
impl RecurrenceStore for ReadOnlyReminders {
    async fn template(&self, id: TemplateId) -> anyhow::Result<Option<Template>> {
        self.inner.template(id).await
    }

    async fn save_template(&self, template: &Template) -> anyhow::Result<()> {
        self.inner.save_template(template).await
    }

    async fn recurring_templates(&self) -> anyhow::Result<Vec<Template>> {
        self.inner.recurring_templates().await
    }

    async fn commit_firing(
        &self,
        expected: &Template,
        template: &Template,
        instance: &Template,
    ) -> anyhow::Result<bool> {
        self.inner.commit_firing(expected, template, instance).await
    }

    async fn instances_of(&self, template_id: TemplateId) -> anyhow::Result<Vec<Template>> {
        self.inner.instances_of(template_id).await
    }

    async fn reminder(&self, id: Uuid) -> anyhow::Result<Option<Reminder>> {
        self.inner.reminder(id).await
    }

    async fn save_reminder(&self, reminder: &Reminder) -> anyhow::Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            anyhow::bail!("read-only file system");
        }
        self.inner.save_reminder(reminder).await
    }
}

#[tokio::test]
async fn test_failed_save_sends_nothing() {
    let clock = Arc::new(ManualClock::new(at(2024, 3, 1)));
    let store = Arc::new(ReadOnlyReminders::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let reminders = ReminderScheduler::new(
        Arc::new(InMemoryJobBackend::new()),
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::<ManualClock>::clone(&clock),
    );

    let task = TaskTemplate::new("user-1", "File taxes", at(2024, 3, 1));
    store.save_template(&task.clone().into()).await.unwrap();
    let mut reminder = Reminder::new(task.id, "user-1", at(2024, 3, 14), "Taxes due");
    reminders.schedule_reminder(&mut reminder).await.unwrap();

    clock.set(at(2024, 3, 14));
    store.reject_writes.store(true, Ordering::SeqCst);
    let err = reminders.fire_reminder(reminder.id).await.unwrap_err();

    assert!(err.is_retryable());
    assert!(notifier.sent().is_empty());
    let stored = store.reminder(reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.state, ReminderState::Pending);

    // The retried job delivers exactly once.
    store.reject_writes.store(false, Ordering::SeqCst);
    let outcome = reminders.fire_reminder(reminder.id).await.unwrap();

    assert_eq!(outcome, ReminderOutcome::Delivered);
    assert_eq!(notifier.sent().len(), 1);
    assert!(store.reminder(reminder.id).await.unwrap().unwrap().is_sent());
}

#[tokio::test]
async fn test_failed_inline_save_leaves_caller_copy_pending() {
    let clock = Arc::new(ManualClock::new(at(2024, 3, 10)));
    let store = Arc::new(ReadOnlyReminders::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let reminders = ReminderScheduler::new(
        Arc::new(InMemoryJobBackend::new()),
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::<ManualClock>::clone(&clock),
    );

    let task = TaskTemplate::new("user-1", "File taxes", at(2024, 3, 1));
    store.save_template(&task.clone().into()).await.unwrap();
    store.reject_writes.store(true, Ordering::SeqCst);
    let mut reminder = Reminder::new(task.id, "user-1", at(2024, 3, 9), "Taxes due");

    assert!(reminders.schedule_reminder(&mut reminder).await.is_err());
    assert!(!reminder.is_sent());
    assert!(notifier.sent().is_empty());
}
