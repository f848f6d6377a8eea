//! Standalone worker for the cadence recurrence engine.
//!
//! Wires the engine to a `SQLite` job database and a JSON template store and
//! drives due jobs with the embedded runner.

pub mod config;
pub mod logging;
pub mod runtime;
pub mod store;

pub use config::{ConfigValidator, ConfigurationError, WorkerConfig};
pub use runtime::Worker;
pub use store::JsonFileStore;
