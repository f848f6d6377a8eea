//! One-shot reminder scheduling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backends::{JobBackend, JobKey, JobPayload};
use crate::clock::Clock;
use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Reminder, Template};
use crate::notifier::Notifier;
use crate::store::RecurrenceStore;

/// Result of scheduling or firing a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// A one-shot job was registered.
    Scheduled { run_at: DateTime<Utc> },
    /// The notification went out.
    Delivered,
    /// The owning task is complete or gone; marked sent without notifying.
    Skipped,
    /// Already delivered earlier.
    AlreadySent,
    /// The reminder no longer exists.
    Missing,
}

/// Schedules reminders and delivers them through a [`Notifier`].
pub struct ReminderScheduler<B, S, N> {
    backend: B,
    store: S,
    notifier: N,
    clock: Arc<dyn Clock>,
}

impl<B: JobBackend, S: RecurrenceStore, N: Notifier> ReminderScheduler<B, S, N> {
    pub fn new(backend: B, store: S, notifier: N, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            store,
            notifier,
            clock,
        }
    }

    /// Schedule `reminder`, or deliver it in-line if its time has passed.
    ///
    /// The reminder is saved in every case except when it was already sent.
    pub async fn schedule_reminder(
        &self,
        reminder: &mut Reminder,
    ) -> SchedulerResult<ReminderOutcome> {
        if reminder.is_sent() {
            return Ok(ReminderOutcome::AlreadySent);
        }

        let now = self.clock.now();
        if reminder.fire_at <= now {
            debug!(
                reminder_id = %reminder.id,
                fire_at = %reminder.fire_at,
                "Reminder due, delivering in-line"
            );
            return self.deliver(reminder).await;
        }

        let key = JobKey::reminder(reminder.id);
        self.backend
            .enqueue(
                &key,
                reminder.fire_at,
                JobPayload::Reminder {
                    reminder_id: reminder.id,
                },
            )
            .await?;
        self.save(reminder).await?;

        debug!(
            reminder_id = %reminder.id,
            job_key = %key,
            run_at = %reminder.fire_at,
            "Reminder scheduled"
        );
        Ok(ReminderOutcome::Scheduled {
            run_at: reminder.fire_at,
        })
    }

    /// Job callback for a reminder. Safe under repeated delivery.
    pub async fn fire_reminder(&self, reminder_id: Uuid) -> SchedulerResult<ReminderOutcome> {
        let Some(mut reminder) = self
            .store
            .reminder(reminder_id)
            .await
            .map_err(SchedulerError::store)?
        else {
            debug!(reminder_id = %reminder_id, "Reminder fired but no longer exists");
            return Ok(ReminderOutcome::Missing);
        };

        if reminder.is_sent() {
            debug!(reminder_id = %reminder_id, "Duplicate reminder firing skipped");
            return Ok(ReminderOutcome::AlreadySent);
        }

        self.deliver(&mut reminder).await
    }

    /// Remove a pending reminder job. Idempotent.
    pub async fn cancel_reminder(&self, reminder_id: Uuid) -> SchedulerResult<bool> {
        let removed = self
            .backend
            .remove_if_exists(&JobKey::reminder(reminder_id))
            .await?;
        debug!(reminder_id = %reminder_id, removed, "Reminder cancelled");
        Ok(removed)
    }

    /// Mark `reminder` sent, persist it, then notify if its task is still
    /// open.
    ///
    /// Delivery is at-most-once: a reminder whose save fails stays pending
    /// and nobody is notified, and the notifier never runs for a reminder
    /// the store does not already record as sent.
    async fn deliver(&self, reminder: &mut Reminder) -> SchedulerResult<ReminderOutcome> {
        let task = self
            .store
            .template(reminder.task_id)
            .await
            .map_err(SchedulerError::store)?;
        let task_open = matches!(&task, Some(Template::Task(task)) if !task.status.is_complete());

        let mut sent = reminder.clone();
        sent.mark_sent();
        self.save(&sent).await?;
        *reminder = sent;

        if !task_open {
            info!(
                reminder_id = %reminder.id,
                task_id = %reminder.task_id,
                "Task complete or missing, reminder skipped"
            );
            return Ok(ReminderOutcome::Skipped);
        }

        self.notifier
            .notify(&reminder.user_id, &reminder.subject, &reminder.body)
            .await;
        info!(reminder_id = %reminder.id, task_id = %reminder.task_id, "Reminder delivered");
        Ok(ReminderOutcome::Delivered)
    }

    async fn save(&self, reminder: &Reminder) -> SchedulerResult<()> {
        self.store
            .save_reminder(reminder)
            .await
            .map_err(SchedulerError::store)
    }
}

impl<B, S, N> std::fmt::Debug for ReminderScheduler<B, S, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderScheduler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryJobBackend;
    use crate::clock::ManualClock;
    use crate::model::{TaskStatus, TaskTemplate};
    use crate::notifier::RecordingNotifier;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_cancel_reminder_is_idempotent() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let backend = Arc::new(InMemoryJobBackend::new());
        let store = Arc::new(InMemoryStore::new());
        let scheduler = ReminderScheduler::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            RecordingNotifier::new(),
            Arc::new(ManualClock::new(now)),
        );

        let mut task = TaskTemplate::new("user-1", "Pay rent", now);
        task.status = TaskStatus::Todo;
        store.save_template(&task.clone().into()).await.unwrap();

        let mut reminder =
            Reminder::new(task.id, "user-1", now + Duration::hours(2), "Rent due");
        scheduler.schedule_reminder(&mut reminder).await.unwrap();

        assert!(scheduler.cancel_reminder(reminder.id).await.unwrap());
        assert!(!scheduler.cancel_reminder(reminder.id).await.unwrap());
        assert!(backend.jobs().is_empty());
    }
}
