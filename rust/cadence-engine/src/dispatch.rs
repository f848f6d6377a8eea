//! Routes claimed jobs to the scheduler that owns them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::{JobBackend, JobPayload, ScheduledJob};
use crate::notifier::Notifier;
use crate::reminders::ReminderScheduler;
use crate::scheduler::RecurrenceScheduler;
use crate::store::RecurrenceStore;
use crate::worker::JobHandler;

/// [`JobHandler`] that fires recurrences and reminders.
pub struct JobDispatcher<B, S, N> {
    recurrences: Arc<RecurrenceScheduler<B, S>>,
    reminders: Arc<ReminderScheduler<B, S, N>>,
}

impl<B, S, N> JobDispatcher<B, S, N> {
    pub fn new(
        recurrences: Arc<RecurrenceScheduler<B, S>>,
        reminders: Arc<ReminderScheduler<B, S, N>>,
    ) -> Self {
        Self {
            recurrences,
            reminders,
        }
    }
}

#[async_trait]
impl<B, S, N> JobHandler for JobDispatcher<B, S, N>
where
    B: JobBackend,
    S: RecurrenceStore,
    N: Notifier,
{
    async fn handle(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        match &job.payload {
            JobPayload::Recurrence { template_id } => {
                let outcome = self.recurrences.fire(*template_id, job.run_at).await?;
                tracing::debug!(job_key = %job.key, outcome = ?outcome, "Recurrence job handled");
            }
            JobPayload::Reminder { reminder_id } => {
                let outcome = self.reminders.fire_reminder(*reminder_id).await?;
                tracing::debug!(job_key = %job.key, outcome = ?outcome, "Reminder job handled");
            }
        }
        Ok(())
    }
}

impl<B, S, N> std::fmt::Debug for JobDispatcher<B, S, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher").finish_non_exhaustive()
    }
}
