//! Binds calculated occurrences to the job backend.
//!
//! Every recurring template has at most one live job, always registered under
//! [`JobKey::recurring`]. Each firing commits one occurrence and then arms the
//! next one, so the chain perpetuates itself without a backend-side "repeat"
//! primitive.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backends::{JobBackend, JobKey, JobPayload};
use crate::calculator::RecurrenceCalculator;
use crate::clock::Clock;
use crate::error::{DescriptorError, SchedulerError, SchedulerResult};
use crate::materializer::{OccurrenceMaterializer, StaleReason};
use crate::model::{RecurrenceDescriptor, Template, TemplateId};
use crate::store::RecurrenceStore;

/// Commit attempts per firing before giving up on a template that keeps
/// changing underneath it.
const COMMIT_ATTEMPTS: usize = 3;

/// Result of handling one recurrence firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiringOutcome {
    /// A new occurrence was created.
    Materialized {
        instance_id: TemplateId,
        next_occurrence: Option<DateTime<Utc>>,
    },
    /// The firing was already handled; nothing was created.
    Duplicate,
    /// The template no longer recurs; its job was cancelled.
    Stale(StaleReason),
}

/// Summary of a [`RecurrenceScheduler::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Templates with a live job afterwards.
    pub armed: usize,
    /// Templates with no further occurrence.
    pub finished: usize,
    /// Templates that could not be re-armed.
    pub failed: usize,
}

/// Schedules, re-arms and cancels recurrence jobs.
pub struct RecurrenceScheduler<B, S> {
    backend: B,
    store: S,
    clock: Arc<dyn Clock>,
    materializer: OccurrenceMaterializer,
}

impl<B: JobBackend, S: RecurrenceStore> RecurrenceScheduler<B, S> {
    /// Create a scheduler with the standard calculator.
    pub fn new(backend: B, store: S, clock: Arc<dyn Clock>) -> Self {
        Self::with_calculator(backend, store, clock, RecurrenceCalculator::new())
    }

    pub fn with_calculator(
        backend: B,
        store: S,
        clock: Arc<dyn Clock>,
        calculator: RecurrenceCalculator,
    ) -> Self {
        Self {
            backend,
            store,
            clock,
            materializer: OccurrenceMaterializer::new(calculator),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn calculator(&self) -> &RecurrenceCalculator {
        self.materializer.calculator()
    }

    /// Arm the next occurrence of `template` and persist the commitment.
    ///
    /// With no further occurrence, any existing job is removed and the
    /// commitment cleared. On backend failure the template is left as it
    /// was.
    pub async fn schedule(
        &self,
        template: &mut Template,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        validate(template)?;
        let now = self.clock.now();
        let next = self.arm(template, now).await?;
        self.store
            .save_template(template)
            .await
            .map_err(SchedulerError::store)?;
        Ok(next)
    }

    /// Replace the live job after a descriptor change: cancel, then schedule.
    ///
    /// If the old job was removed but the new one could not be armed, the
    /// commitment is cleared rather than left pointing at a job that no
    /// longer exists.
    pub async fn update(&self, template: &mut Template) -> SchedulerResult<Option<DateTime<Utc>>> {
        validate(template)?;
        let id = template.id();
        self.cancel(id).await?;

        match self.schedule(template).await {
            Ok(next) => Ok(next),
            Err(err @ SchedulerError::BackendUnavailable(_)) => {
                warn!(
                    template_id = %id,
                    error = %err,
                    "Re-arm failed after cancel, clearing commitment"
                );
                if let Some(descriptor) = template.recurrence_mut() {
                    descriptor.next_processing_at = None;
                }
                self.store
                    .save_template(template)
                    .await
                    .map_err(SchedulerError::store)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Load a template from the store and [`update`](Self::update) it.
    pub async fn reschedule(
        &self,
        template_id: TemplateId,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let mut template = self
            .store
            .template(template_id)
            .await
            .map_err(SchedulerError::store)?
            .ok_or(SchedulerError::TemplateNotFound(template_id))?;
        self.update(&mut template).await
    }

    /// Remove the live job of a template. Idempotent.
    ///
    /// A firing already in progress is not interrupted, but it will not
    /// commit over the edit that accompanies the cancel.
    pub async fn cancel(&self, template_id: TemplateId) -> SchedulerResult<bool> {
        let key = JobKey::recurring(template_id);
        let removed = self.backend.remove_if_exists(&key).await?;
        debug!(template_id = %template_id, job_key = %key, removed, "Recurrence job cancelled");
        Ok(removed)
    }

    /// Job callback: materialize the occurrence scheduled for `run_at` and
    /// arm the next one.
    ///
    /// The occurrence is committed against the template as it was read. If
    /// the template was edited meanwhile nothing is written and the firing
    /// starts over from the stored state, so a concurrent cancel always
    /// wins. The next job is armed only after the commit; a redelivered
    /// firing that finds its occurrence already committed re-arms the
    /// recorded commitment instead.
    pub async fn fire(
        &self,
        template_id: TemplateId,
        run_at: DateTime<Utc>,
    ) -> SchedulerResult<FiringOutcome> {
        for attempt in 1..=COMMIT_ATTEMPTS {
            if let Some(outcome) = self.try_fire(template_id, run_at).await? {
                return Ok(outcome);
            }
            debug!(
                template_id = %template_id,
                attempt,
                "Template changed during firing, starting over"
            );
        }

        warn!(template_id = %template_id, run_at = %run_at, "Firing kept conflicting");
        Err(SchedulerError::Conflict(template_id))
    }

    /// Re-arm every recurring template in the store.
    ///
    /// A commitment that was recorded but never processed is re-armed at its
    /// original time, so an occurrence claimed by a worker that died before
    /// committing it is still delivered. Templates without one are
    /// recomputed from now. Failures are logged and counted; the pass
    /// continues with the next template.
    pub async fn reconcile(&self) -> SchedulerResult<ReconcileReport> {
        let templates = self
            .store
            .recurring_templates()
            .await
            .map_err(SchedulerError::store)?;

        let mut report = ReconcileReport::default();
        for mut template in templates {
            let id = template.id();
            let result = match pending_commitment(&template) {
                Some(run_at) => {
                    debug!(template_id = %id, run_at = %run_at, "Restoring unprocessed commitment");
                    self.place(id, Some(run_at)).await.map(|()| Some(run_at))
                }
                None => self.update(&mut template).await,
            };

            match result {
                Ok(Some(_)) => report.armed += 1,
                Ok(None) => report.finished += 1,
                Err(err) => {
                    warn!(template_id = %id, error = %err, "Failed to re-arm template");
                    report.failed += 1;
                }
            }
        }

        info!(
            armed = report.armed,
            finished = report.finished,
            failed = report.failed,
            "Recurrence reconcile complete"
        );
        Ok(report)
    }

    /// One firing attempt. `None` means the commit lost a race with an edit.
    async fn try_fire(
        &self,
        template_id: TemplateId,
        run_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<FiringOutcome>> {
        let now = self.clock.now();

        let Some(template) = self
            .store
            .template(template_id)
            .await
            .map_err(SchedulerError::store)?
        else {
            return self
                .retire(template_id, None, StaleReason::Missing)
                .await
                .map(Some);
        };

        let descriptor = match OccurrenceMaterializer::check(&template, now) {
            Ok(descriptor) => descriptor,
            Err(reason) => {
                return self
                    .retire(template_id, Some(template), reason)
                    .await
                    .map(Some);
            }
        };

        if OccurrenceMaterializer::is_duplicate(descriptor, run_at) {
            debug!(
                template_id = %template_id,
                run_at = %run_at,
                "Duplicate recurrence firing skipped"
            );
            self.place(template_id, descriptor.next_processing_at).await?;
            return Ok(Some(FiringOutcome::Duplicate));
        }

        let materialized = match self.materializer.materialize(&template, now) {
            Ok(materialized) => materialized,
            Err(reason) => {
                return self
                    .retire(template_id, Some(template), reason)
                    .await
                    .map(Some);
            }
        };

        let committed = self
            .store
            .commit_firing(&template, &materialized.template, &materialized.instance)
            .await
            .map_err(SchedulerError::store)?;
        if !committed {
            return Ok(None);
        }

        let next_occurrence = materialized.next_occurrence;
        if let Err(err) = self.place(template_id, next_occurrence).await {
            warn!(
                template_id = %template_id,
                error = %err,
                "Occurrence committed but next job not armed"
            );
            return Err(err);
        }

        info!(
            template_id = %template_id,
            kind = template.kind(),
            instance_id = %materialized.instance.id(),
            next = ?next_occurrence,
            "Occurrence materialized"
        );

        Ok(Some(FiringOutcome::Materialized {
            instance_id: materialized.instance.id(),
            next_occurrence,
        }))
    }

    /// Register (or remove) the job for the template's next occurrence and
    /// record the commitment on its descriptor.
    async fn arm(
        &self,
        template: &mut Template,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let next = template
            .active_recurrence()
            .and_then(|descriptor| self.calculator().next_occurrence(descriptor, now));
        self.place(template.id(), next).await?;

        if let Some(descriptor) = template.recurrence_mut() {
            descriptor.next_processing_at = next;
        }
        Ok(next)
    }

    /// Point the template's job at `next`, or remove it when there is none.
    async fn place(
        &self,
        template_id: TemplateId,
        next: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let key = JobKey::recurring(template_id);
        match next {
            Some(run_at) => {
                self.backend
                    .enqueue(&key, run_at, JobPayload::Recurrence { template_id })
                    .await?;
                debug!(
                    template_id = %template_id,
                    job_key = %key,
                    run_at = %run_at,
                    "Recurrence job armed"
                );
            }
            None => {
                self.backend.remove_if_exists(&key).await?;
                debug!(
                    template_id = %template_id,
                    job_key = %key,
                    "No further occurrence, job removed"
                );
            }
        }
        Ok(())
    }

    /// Self-heal after a stale firing: drop the job and clear any leftover
    /// commitment.
    async fn retire(
        &self,
        template_id: TemplateId,
        template: Option<Template>,
        reason: StaleReason,
    ) -> SchedulerResult<FiringOutcome> {
        info!(template_id = %template_id, reason = %reason, "Stale recurrence firing, cancelling");
        self.cancel(template_id).await?;

        if let Some(mut template) = template {
            if let Some(descriptor) = template.recurrence_mut() {
                if descriptor.next_processing_at.take().is_some() {
                    self.store
                        .save_template(&template)
                        .await
                        .map_err(SchedulerError::store)?;
                }
            }
        }

        Ok(FiringOutcome::Stale(reason))
    }
}

/// The recorded next occurrence, unless it was already processed.
fn pending_commitment(template: &Template) -> Option<DateTime<Utc>> {
    let descriptor = template.active_recurrence()?;
    let next = descriptor.next_processing_at?;
    match descriptor.last_processed_at {
        Some(last) if last >= next => None,
        _ => Some(next),
    }
}

/// Reject malformed descriptors. A custom descriptor without an expression
/// is accepted and simply never fires.
fn validate(template: &Template) -> SchedulerResult<()> {
    match template.active_recurrence().map(RecurrenceDescriptor::validate) {
        None | Some(Ok(()) | Err(DescriptorError::MissingExpression)) => Ok(()),
        Some(Err(err)) => Err(err.into()),
    }
}

impl<B, S> std::fmt::Debug for RecurrenceScheduler<B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurrenceScheduler")
            .field("materializer", &self.materializer)
            .finish_non_exhaustive()
    }
}
