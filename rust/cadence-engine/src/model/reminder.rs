//! One-shot task reminders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TemplateId;

/// Reminder delivery state. `Sent` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderState {
    #[default]
    Pending,
    Sent,
}

/// A notification owned by a task, delivered once at `fire_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub task_id: TemplateId,
    pub user_id: String,
    pub fire_at: DateTime<Utc>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: ReminderState,
}

impl Reminder {
    /// Create a pending reminder.
    #[must_use]
    pub fn new(
        task_id: TemplateId,
        user_id: impl Into<String>,
        fire_at: DateTime<Utc>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            user_id: user_id.into(),
            fire_at,
            subject: subject.into(),
            body: String::new(),
            state: ReminderState::Pending,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.state == ReminderState::Sent
    }

    pub fn mark_sent(&mut self) {
        self.state = ReminderState::Sent;
    }
}
