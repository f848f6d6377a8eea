//! Domain types shared by the scheduling components.

mod recurrence;
mod reminder;
mod template;

pub use recurrence::{RecurrenceDescriptor, RecurrenceType};
pub use reminder::{Reminder, ReminderState};
pub use template::{
    ExpenseTemplate, TaskPriority, TaskStatus, TaskTemplate, Template, TemplateId,
};
