//! Spawns concrete occurrences from recurring templates.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::calculator::RecurrenceCalculator;
use crate::model::{
    ExpenseTemplate, RecurrenceDescriptor, TaskStatus, TaskTemplate, Template,
};

/// Why a template can no longer be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The template no longer exists.
    Missing,
    /// Recurrence was turned off.
    NotRecurring,
    /// The template is flagged recurring but has no descriptor.
    MissingDescriptor,
    /// The end date has passed.
    Ended,
}

impl StaleReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::NotRecurring => "not_recurring",
            Self::MissingDescriptor => "missing_descriptor",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// The template with its descriptor advanced.
    pub template: Template,
    /// The new, non-recurring occurrence.
    pub instance: Template,
    /// Next occurrence computed for the advanced descriptor.
    pub next_occurrence: Option<DateTime<Utc>>,
}

/// Creates occurrence instances and advances descriptor bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct OccurrenceMaterializer {
    calculator: RecurrenceCalculator,
}

impl OccurrenceMaterializer {
    #[must_use]
    pub fn new(calculator: RecurrenceCalculator) -> Self {
        Self { calculator }
    }

    #[must_use]
    pub fn calculator(&self) -> &RecurrenceCalculator {
        &self.calculator
    }

    /// Check the preconditions for materializing `template` at `now`.
    pub fn check<'a>(
        template: &'a Template,
        now: DateTime<Utc>,
    ) -> Result<&'a RecurrenceDescriptor, StaleReason> {
        if !template.is_recurring() {
            return Err(StaleReason::NotRecurring);
        }
        let descriptor = template
            .recurrence()
            .ok_or(StaleReason::MissingDescriptor)?;
        if descriptor.has_ended(now) {
            return Err(StaleReason::Ended);
        }
        Ok(descriptor)
    }

    /// Whether a firing scheduled for `run_at` was already handled.
    ///
    /// A firing is a duplicate once `last_processed_at` reached it, or once
    /// the commitment moved past it.
    #[must_use]
    pub fn is_duplicate(descriptor: &RecurrenceDescriptor, run_at: DateTime<Utc>) -> bool {
        descriptor
            .last_processed_at
            .is_some_and(|last| last >= run_at)
            || descriptor
                .next_processing_at
                .is_some_and(|next| next > run_at)
    }

    /// Spawn an occurrence of `template` at `now`.
    ///
    /// The returned template carries `last_processed_at = now` and the newly
    /// computed `next_processing_at`. The caller commits it before arming
    /// the next job.
    pub fn materialize(
        &self,
        template: &Template,
        now: DateTime<Utc>,
    ) -> Result<Materialized, StaleReason> {
        let descriptor = Self::check(template, now)?;

        let mut advanced = descriptor.clone();
        advanced.last_processed_at = Some(now);
        let next_occurrence = self.calculator.next_occurrence(&advanced, now);
        advanced.next_processing_at = next_occurrence;

        let instance = match template {
            Template::Task(task) => Template::Task(spawn_task(task, now)),
            Template::Expense(expense) => Template::Expense(spawn_expense(expense, now)),
        };

        let mut updated = template.clone();
        if let Some(slot) = updated.recurrence_mut() {
            *slot = advanced;
        }

        Ok(Materialized {
            template: updated,
            instance,
            next_occurrence,
        })
    }
}

/// Copy a task, resetting progress and shifting the due date by the
/// template's original creation-to-due offset.
fn spawn_task(task: &TaskTemplate, now: DateTime<Utc>) -> TaskTemplate {
    let due_at = task.due_at.and_then(|due| {
        let offset = due.signed_duration_since(task.created_at);
        now.checked_add_signed(offset)
    });

    TaskTemplate {
        id: Uuid::new_v4(),
        owner_id: task.owner_id.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        priority: task.priority,
        status: TaskStatus::Todo,
        progress: 0,
        tags: task.tags.clone(),
        due_at,
        created_at: now,
        completed_at: None,
        is_recurring: false,
        recurrence: None,
        source_template_id: Some(task.id),
    }
}

fn spawn_expense(expense: &ExpenseTemplate, now: DateTime<Utc>) -> ExpenseTemplate {
    ExpenseTemplate {
        id: Uuid::new_v4(),
        owner_id: expense.owner_id.clone(),
        title: expense.title.clone(),
        description: expense.description.clone(),
        amount_minor: expense.amount_minor,
        currency: expense.currency.clone(),
        category: expense.category.clone(),
        tags: expense.tags.clone(),
        occurred_on: now.date_naive(),
        created_at: now,
        is_recurring: false,
        recurrence: None,
        source_template_id: Some(expense.id),
    }
}
