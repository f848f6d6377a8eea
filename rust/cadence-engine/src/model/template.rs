//! Template entities (tasks and expenses) and the occurrences spawned from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RecurrenceDescriptor;

/// Identifier of a task or expense.
pub type TemplateId = Uuid;

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task no longer needs attention.
    #[must_use]
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// A task, recurring or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: TemplateId,
    pub owner_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    /// Completion percentage (0-100).
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceDescriptor>,
    /// Template this task was spawned from, if it is an occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_id: Option<TemplateId>,
}

impl TaskTemplate {
    /// Create a non-recurring task.
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            title: title.into(),
            description: None,
            priority: TaskPriority::default(),
            status: TaskStatus::default(),
            progress: 0,
            tags: Vec::new(),
            due_at: None,
            created_at,
            completed_at: None,
            is_recurring: false,
            recurrence: None,
            source_template_id: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a recurrence descriptor, making the task a template.
    #[must_use]
    pub fn with_recurrence(mut self, descriptor: RecurrenceDescriptor) -> Self {
        self.is_recurring = true;
        self.recurrence = Some(descriptor);
        self
    }
}

/// An expense, recurring or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseTemplate {
    pub id: TemplateId,
    pub owner_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Amount in minor currency units (cents).
    pub amount_minor: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub occurred_on: NaiveDate,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_id: Option<TemplateId>,
}

impl ExpenseTemplate {
    /// Create a non-recurring expense dated on the creation day.
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        amount_minor: i64,
        currency: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            title: title.into(),
            description: None,
            amount_minor,
            currency: currency.into(),
            category: None,
            tags: Vec::new(),
            occurred_on: created_at.date_naive(),
            created_at,
            is_recurring: false,
            recurrence: None,
            source_template_id: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a recurrence descriptor, making the expense a template.
    #[must_use]
    pub fn with_recurrence(mut self, descriptor: RecurrenceDescriptor) -> Self {
        self.is_recurring = true;
        self.recurrence = Some(descriptor);
        self
    }
}

/// A task or an expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Template {
    Task(TaskTemplate),
    Expense(ExpenseTemplate),
}

impl Template {
    #[must_use]
    pub fn id(&self) -> TemplateId {
        match self {
            Self::Task(task) => task.id,
            Self::Expense(expense) => expense.id,
        }
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        match self {
            Self::Task(task) => &task.owner_id,
            Self::Expense(expense) => &expense.owner_id,
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Task(task) => &task.title,
            Self::Expense(expense) => &expense.title,
        }
    }

    /// Get the entity kind as a string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Expense(_) => "expense",
        }
    }

    #[must_use]
    pub fn is_recurring(&self) -> bool {
        match self {
            Self::Task(task) => task.is_recurring,
            Self::Expense(expense) => expense.is_recurring,
        }
    }

    #[must_use]
    pub fn recurrence(&self) -> Option<&RecurrenceDescriptor> {
        match self {
            Self::Task(task) => task.recurrence.as_ref(),
            Self::Expense(expense) => expense.recurrence.as_ref(),
        }
    }

    pub fn recurrence_mut(&mut self) -> Option<&mut RecurrenceDescriptor> {
        match self {
            Self::Task(task) => task.recurrence.as_mut(),
            Self::Expense(expense) => expense.recurrence.as_mut(),
        }
    }

    /// Descriptor of a template that is currently recurring.
    #[must_use]
    pub fn active_recurrence(&self) -> Option<&RecurrenceDescriptor> {
        if self.is_recurring() {
            self.recurrence()
        } else {
            None
        }
    }

    /// Turn recurrence off. The descriptor is dropped along with the flag.
    pub fn stop_recurring(&mut self) {
        match self {
            Self::Task(task) => {
                task.is_recurring = false;
                task.recurrence = None;
            }
            Self::Expense(expense) => {
                expense.is_recurring = false;
                expense.recurrence = None;
            }
        }
    }

    #[must_use]
    pub fn source_template_id(&self) -> Option<TemplateId> {
        match self {
            Self::Task(task) => task.source_template_id,
            Self::Expense(expense) => expense.source_template_id,
        }
    }
}

impl From<TaskTemplate> for Template {
    fn from(task: TaskTemplate) -> Self {
        Self::Task(task)
    }
}

impl From<ExpenseTemplate> for Template {
    fn from(expense: ExpenseTemplate) -> Self {
        Self::Expense(expense)
    }
}
