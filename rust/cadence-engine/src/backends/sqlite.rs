//! `SQLite` job backend.
//!
//! Durable storage for scheduled jobs with:
//! - One row per job key (add-or-replace via upsert)
//! - Write-Ahead Logging (WAL) for concurrent access
//! - Leased claims (`claimed_until`) taken inside an immediate transaction;
//!   a row is deleted only once its job completes
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_engine::backends::SqliteJobBackend;
//!
//! let backend = SqliteJobBackend::new("./data/jobs.db").await?;
//! backend.enqueue(&key, run_at, payload).await?;
//! let due = backend.take_due(now, 32, now + lease).await?;
//! for job in &due {
//!     backend.complete(job).await?;
//! }
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::task;

use super::{JobBackend, JobKey, JobPayload, JobQueue, ScheduledJob};
use crate::error::BackendError;

/// SQLite-backed job store.
///
/// Each operation opens its own connection on the blocking thread pool, so
/// the backend is `Clone` and shares no state besides the database file.
#[derive(Debug, Clone)]
pub struct SqliteJobBackend {
    /// Path to the `SQLite` database file.
    db_path: PathBuf,
}

/// Raw row before payload decoding.
struct JobRow {
    key: String,
    run_at_ms: i64,
    payload: String,
    attempts: i64,
}

impl SqliteJobBackend {
    /// Open (and create if needed) the job database at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or the schema cannot
    /// be created.
    pub async fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let backend = Self {
            db_path: path.into(),
        };
        backend.migrate_schema().await?;
        Ok(backend)
    }

    /// Path of the underlying database file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.db_path
    }

    async fn migrate_schema(&self) -> Result<()> {
        let db_path = self.db_path.clone();

        task::spawn_blocking(move || -> Result<()> {
            let conn = open(&db_path)?;

            conn.execute(
                r"
                CREATE TABLE IF NOT EXISTS scheduled_jobs (
                    job_key TEXT PRIMARY KEY,
                    run_at INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    claimed_until INTEGER,
                    updated_at INTEGER NOT NULL
                )
                ",
                [],
            )
            .context("Failed to create scheduled_jobs table")?;

            // Databases created before leases existed lack the column.
            let columns = conn
                .prepare("PRAGMA table_info(scheduled_jobs)")
                .context("Failed to inspect scheduled_jobs")?
                .query_map([], |row| row.get::<_, String>(1))
                .context("Failed to query scheduled_jobs columns")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read scheduled_jobs columns")?;
            if !columns.iter().any(|name| name == "claimed_until") {
                conn.execute(
                    "ALTER TABLE scheduled_jobs ADD COLUMN claimed_until INTEGER",
                    [],
                )
                .context("Failed to add claimed_until column")?;
            }

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_run_at ON scheduled_jobs(run_at)",
                [],
            )
            .context("Failed to create run_at index")?;

            Ok(())
        })
        .await
        .context("Failed to spawn blocking task")??;

        Ok(())
    }

    /// Run `op` against a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || -> Result<T> {
            let mut conn = open(&db_path)?;
            op(&mut conn)
        })
        .await
        .context("Failed to spawn blocking task")
        .and_then(|result| result)
        .map_err(|e| BackendError::Unavailable(format!("{e:#}")))
    }
}

fn open(db_path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(db_path).context("Failed to open job database")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("Failed to enable WAL mode")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("Failed to set busy timeout")?;
    Ok(conn)
}

fn encode_payload(payload: &JobPayload) -> Result<String, BackendError> {
    serde_json::to_string(payload).map_err(|e| BackendError::Payload(e.to_string()))
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        key: row.get(0)?,
        run_at_ms: row.get(1)?,
        payload: row.get(2)?,
        attempts: row.get(3)?,
    })
}

fn decode_row(row: JobRow) -> Result<ScheduledJob> {
    let payload: JobPayload =
        serde_json::from_str(&row.payload).context("Failed to decode job payload")?;
    let run_at = DateTime::<Utc>::from_timestamp_millis(row.run_at_ms)
        .context("Job run_at out of range")?;
    Ok(ScheduledJob {
        key: JobKey::from(row.key),
        run_at,
        payload,
        attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
    })
}

#[async_trait]
impl JobBackend for SqliteJobBackend {
    async fn enqueue(
        &self,
        key: &JobKey,
        run_at: DateTime<Utc>,
        payload: JobPayload,
    ) -> Result<(), BackendError> {
        let key = key.as_str().to_string();
        let payload = encode_payload(&payload)?;
        let run_at_ms = run_at.timestamp_millis();

        self.with_connection(move |conn| {
            conn.execute(
                r"
                INSERT INTO scheduled_jobs (job_key, run_at, payload, attempts, updated_at)
                VALUES (?1, ?2, ?3, 0, ?4)
                ON CONFLICT(job_key) DO UPDATE SET
                    run_at = excluded.run_at,
                    payload = excluded.payload,
                    attempts = 0,
                    claimed_until = NULL,
                    updated_at = excluded.updated_at
                ",
                params![&key, run_at_ms, &payload, Utc::now().timestamp_millis()],
            )
            .context("Failed to upsert job")?;
            Ok(())
        })
        .await
    }

    async fn remove_if_exists(&self, key: &JobKey) -> Result<bool, BackendError> {
        let key = key.as_str().to_string();

        self.with_connection(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM scheduled_jobs WHERE job_key = ?1",
                    params![&key],
                )
                .context("Failed to delete job")?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl JobQueue for SqliteJobBackend {
    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, BackendError> {
        let now_ms = now.timestamp_millis();
        let lease_ms = lease_until.timestamp_millis();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_connection(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("Failed to begin transaction")?;

            let rows = {
                let mut stmt = tx
                    .prepare(
                        r"
                        SELECT job_key, run_at, payload, attempts FROM scheduled_jobs
                        WHERE run_at <= ?1
                          AND (claimed_until IS NULL OR claimed_until <= ?1)
                        ORDER BY run_at ASC, job_key ASC
                        LIMIT ?2
                        ",
                    )
                    .context("Failed to prepare due query")?;
                let rows = stmt
                    .query_map(params![now_ms, limit], read_row)
                    .context("Failed to execute due query")?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .context("Failed to read due jobs")?;
                rows
            };

            let mut jobs = Vec::with_capacity(rows.len());
            for row in rows {
                let key = row.key.clone();
                match decode_row(row) {
                    Ok(job) => {
                        tx.execute(
                            "UPDATE scheduled_jobs SET claimed_until = ?2 WHERE job_key = ?1",
                            params![&key, lease_ms],
                        )
                        .context("Failed to claim job")?;
                        jobs.push(job);
                    }
                    Err(e) => {
                        tracing::error!(job_key = %key, error = %e, "Dropping undecodable job");
                        tx.execute(
                            "DELETE FROM scheduled_jobs WHERE job_key = ?1",
                            params![&key],
                        )
                        .context("Failed to drop undecodable job")?;
                    }
                }
            }

            tx.commit().context("Failed to commit claim")?;
            Ok(jobs)
        })
        .await
    }

    async fn complete(&self, job: &ScheduledJob) -> Result<bool, BackendError> {
        let key = job.key.as_str().to_string();
        let run_at_ms = job.run_at.timestamp_millis();

        self.with_connection(move |conn| {
            let deleted = conn
                .execute(
                    r"
                    DELETE FROM scheduled_jobs
                    WHERE job_key = ?1 AND run_at = ?2 AND claimed_until IS NOT NULL
                    ",
                    params![&key, run_at_ms],
                )
                .context("Failed to complete job")?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn release(
        &self,
        job: &ScheduledJob,
        retry_at: DateTime<Utc>,
    ) -> Result<bool, BackendError> {
        let key = job.key.as_str().to_string();
        let run_at_ms = job.run_at.timestamp_millis();
        let attempts = i64::from(job.attempts) + 1;
        let retry_at_ms = retry_at.timestamp_millis();

        self.with_connection(move |conn| {
            let updated = conn
                .execute(
                    r"
                    UPDATE scheduled_jobs
                    SET run_at = ?3, attempts = ?4, claimed_until = NULL, updated_at = ?5
                    WHERE job_key = ?1 AND run_at = ?2 AND claimed_until IS NOT NULL
                    ",
                    params![
                        &key,
                        run_at_ms,
                        retry_at_ms,
                        attempts,
                        Utc::now().timestamp_millis()
                    ],
                )
                .context("Failed to release job")?;
            Ok(updated > 0)
        })
        .await
    }

    async fn pending(&self, key: &JobKey) -> Result<Option<ScheduledJob>, BackendError> {
        let key = key.as_str().to_string();

        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    r"
                    SELECT job_key, run_at, payload, attempts FROM scheduled_jobs
                    WHERE job_key = ?1 AND claimed_until IS NULL
                    ",
                    params![&key],
                    read_row,
                )
                .optional()
                .context("Failed to query job")?;
            row.map(decode_row).transpose()
        })
        .await
    }
}
