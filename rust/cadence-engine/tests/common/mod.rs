//! Shared fixtures for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;

use cadence_engine::backends::InMemoryJobBackend;
use cadence_engine::clock::{Clock, ManualClock};
use cadence_engine::notifier::RecordingNotifier;
use cadence_engine::reminders::ReminderScheduler;
use cadence_engine::scheduler::RecurrenceScheduler;
use cadence_engine::store::InMemoryStore;
use chrono::{DateTime, TimeZone, Utc};
use proptest::test_runner::Config;

pub type TestScheduler = RecurrenceScheduler<Arc<InMemoryJobBackend>, Arc<InMemoryStore>>;
pub type TestReminders =
    ReminderScheduler<Arc<InMemoryJobBackend>, Arc<InMemoryStore>, Arc<RecordingNotifier>>;

/// 09:30 UTC on the given date.
pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
}

pub fn proptest_config() -> Config {
    Config {
        cases: 256,
        ..Config::default()
    }
}

/// Schedulers wired to in-memory collaborators and a manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub backend: Arc<InMemoryJobBackend>,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<TestScheduler>,
    pub reminders: Arc<TestReminders>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let backend = Arc::new(InMemoryJobBackend::new());
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let shared_clock: Arc<dyn Clock> = Arc::<ManualClock>::clone(&clock);

        let scheduler = Arc::new(RecurrenceScheduler::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&shared_clock),
        ));
        let reminders = Arc::new(ReminderScheduler::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&notifier),
            shared_clock,
        ));

        Self {
            clock,
            backend,
            store,
            notifier,
            scheduler,
            reminders,
        }
    }
}
