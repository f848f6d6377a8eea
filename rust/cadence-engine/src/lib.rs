//! Recurrence scheduling engine for recurring tasks and expenses.
//!
//! This crate provides:
//! - A pure next-occurrence calculator (daily to yearly, plus cron escape hatch)
//! - A scheduler that keeps exactly one live job per recurring template
//! - An occurrence materializer that spawns concrete instances
//! - One-shot reminders with in-line delivery for past fire times
//! - In-memory and `SQLite` job backends with an embedded polling runner
//!
//! # Architecture
//!
//! The job backend only knows "run this payload at this time under this
//! key". Each firing materializes one occurrence and arms the next job under
//! the same key, so irregular intervals (every 2 weeks, every 3 months) need
//! no backend-side repeat primitive.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cadence_engine::prelude::*;
//!
//! let backend = Arc::new(InMemoryJobBackend::new());
//! let store = Arc::new(InMemoryStore::new());
//! let scheduler = RecurrenceScheduler::new(backend, store, Arc::new(SystemClock));
//!
//! let mut template: Template = TaskTemplate::new("user-1", "Water plants", Utc::now())
//!     .with_recurrence(RecurrenceDescriptor::weekly(Utc::now()).with_interval(2))
//!     .into();
//! let next = scheduler.schedule(&mut template).await?;
//! ```

pub mod backends;
pub mod calculator;
pub mod clock;
pub mod cron;
pub mod dispatch;
pub mod error;
pub mod materializer;
pub mod model;
pub mod notifier;
pub mod reminders;
pub mod scheduler;
pub mod store;
pub mod worker;

// Re-exports
pub use backends::{InMemoryJobBackend, JobBackend, JobKey, JobPayload, JobQueue, ScheduledJob};
pub use calculator::RecurrenceCalculator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::JobDispatcher;
pub use error::{BackendError, DescriptorError, SchedulerError, SchedulerResult};
pub use materializer::{Materialized, OccurrenceMaterializer, StaleReason};
pub use reminders::{ReminderOutcome, ReminderScheduler};
pub use scheduler::{FiringOutcome, ReconcileReport, RecurrenceScheduler};
pub use store::{InMemoryStore, RecurrenceStore, StoreSnapshot};
pub use worker::{EmbeddedRunner, JobHandler, PollReport, RunnerConfig};

#[cfg(feature = "sqlite-backend")]
pub use backends::SqliteJobBackend;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backends::{InMemoryJobBackend, JobBackend, JobKey, JobPayload, JobQueue};
    pub use crate::calculator::RecurrenceCalculator;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::model::{
        ExpenseTemplate, RecurrenceDescriptor, RecurrenceType, Reminder, TaskTemplate, Template,
    };
    pub use crate::notifier::{Notifier, TracingNotifier};
    pub use crate::reminders::ReminderScheduler;
    pub use crate::scheduler::{FiringOutcome, RecurrenceScheduler};
    pub use crate::store::{InMemoryStore, RecurrenceStore};
    pub use crate::worker::{EmbeddedRunner, RunnerConfig};
    pub use std::sync::Arc;
    pub use chrono::Utc;
}
