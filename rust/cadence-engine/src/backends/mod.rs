//! Job backends that hold scheduled callbacks.
//!
//! The engine only needs the narrow [`JobBackend`] contract: add-or-replace a
//! job under a stable key, and remove it if present. Backends that can also be
//! polled in-process implement [`JobQueue`] so the
//! [`EmbeddedRunner`](crate::worker::EmbeddedRunner) can drive them.

#[cfg(feature = "sqlite-backend")]
pub mod sqlite;

#[cfg(feature = "sqlite-backend")]
pub use sqlite::SqliteJobBackend;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;
use crate::model::TemplateId;

/// Stable key a job is registered under.
///
/// Derived deterministically from the owning entity so a job can be replaced
/// or removed without storing the backend's own handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    /// Key of the recurrence chain of a template.
    #[must_use]
    pub fn recurring(template_id: TemplateId) -> Self {
        Self(format!("recurring:{template_id}"))
    }

    /// Key of a one-shot reminder.
    #[must_use]
    pub fn reminder(reminder_id: Uuid) -> Self {
        Self(format!("reminder:{reminder_id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// What a job does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Materialize the next occurrence of a template and re-arm.
    Recurrence { template_id: TemplateId },
    /// Deliver a reminder.
    Reminder { reminder_id: Uuid },
}

impl JobPayload {
    /// Key this payload is always registered under.
    #[must_use]
    pub fn key(&self) -> JobKey {
        match self {
            Self::Recurrence { template_id } => JobKey::recurring(*template_id),
            Self::Reminder { reminder_id } => JobKey::reminder(*reminder_id),
        }
    }
}

/// A job as handed to a job handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub key: JobKey,
    pub run_at: DateTime<Utc>,
    pub payload: JobPayload,
    /// Delivery attempts before this one.
    #[serde(default)]
    pub attempts: u32,
}

impl ScheduledJob {
    #[must_use]
    pub fn new(key: JobKey, run_at: DateTime<Utc>, payload: JobPayload) -> Self {
        Self {
            key,
            run_at,
            payload,
            attempts: 0,
        }
    }
}

/// Job-execution backend consumed by the schedulers.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Register `payload` to run at `run_at`, replacing any pending job under
    /// the same key.
    async fn enqueue(
        &self,
        key: &JobKey,
        run_at: DateTime<Utc>,
        payload: JobPayload,
    ) -> Result<(), BackendError>;

    /// Remove the pending job under `key`. Returns whether one existed;
    /// removing a missing job is not an error.
    async fn remove_if_exists(&self, key: &JobKey) -> Result<bool, BackendError>;
}

/// Backends that can be polled by an in-process runner.
///
/// Claiming a job leases it instead of removing it. A job whose handler never
/// reports back becomes due again once its lease expires, so a worker dying
/// mid-firing does not lose the firing.
///
/// Re-arming a claimed key with [`JobBackend::enqueue`] replaces the claimed
/// job with a fresh, unclaimed one. [`complete`](Self::complete) and
/// [`release`](Self::release) then leave the fresh job alone.
#[async_trait]
pub trait JobQueue: JobBackend {
    /// Claim up to `limit` jobs due at `now`, earliest first, leasing each
    /// until `lease_until`. Jobs under an unexpired lease are skipped.
    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, BackendError>;

    /// Delete a handled job. Returns `false` when the claim no longer exists
    /// because the key was re-armed or removed meanwhile.
    async fn complete(&self, job: &ScheduledJob) -> Result<bool, BackendError>;

    /// Put a failed job back for another attempt at `retry_at`, unless the key
    /// was re-armed or removed meanwhile.
    async fn release(
        &self,
        job: &ScheduledJob,
        retry_at: DateTime<Utc>,
    ) -> Result<bool, BackendError>;

    /// Unclaimed job under `key`, if any.
    async fn pending(&self, key: &JobKey) -> Result<Option<ScheduledJob>, BackendError>;
}

/// A call made against [`InMemoryJobBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Enqueue { key: JobKey, run_at: DateTime<Utc> },
    RemoveIfExists { key: JobKey },
}

/// A stored job and its lease, if claimed.
#[derive(Debug, Clone)]
struct Slot {
    job: ScheduledJob,
    claimed_until: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.job.run_at <= now && !matches!(self.claimed_until, Some(until) if until > now)
    }

    /// Whether this slot is still the claim `job` was handed out from.
    fn holds(&self, job: &ScheduledJob) -> bool {
        self.claimed_until.is_some() && self.job.run_at == job.run_at
    }
}

/// In-memory job backend for embedding and testing.
///
/// Records every call so tests can verify exactly what the schedulers asked
/// for, and can be switched offline to simulate an unreachable backend.
#[derive(Debug)]
pub struct InMemoryJobBackend {
    jobs: parking_lot::RwLock<HashMap<JobKey, Slot>>,
    calls: parking_lot::Mutex<Vec<BackendCall>>,
    available: AtomicBool,
}

impl InMemoryJobBackend {
    /// Create an empty, available backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: parking_lot::RwLock::new(HashMap::new()),
            calls: parking_lot::Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going offline or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of all unclaimed jobs, earliest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.collect(|slot| slot.claimed_until.is_none())
    }

    /// Snapshot of all claimed jobs, earliest first.
    #[must_use]
    pub fn claimed(&self) -> Vec<ScheduledJob> {
        self.collect(|slot| slot.claimed_until.is_some())
    }

    /// Unclaimed job under `key`, if any.
    #[must_use]
    pub fn job(&self, key: &JobKey) -> Option<ScheduledJob> {
        self.jobs
            .read()
            .get(key)
            .filter(|slot| slot.claimed_until.is_none())
            .map(|slot| slot.job.clone())
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn collect(&self, keep: impl Fn(&Slot) -> bool) -> Vec<ScheduledJob> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .values()
            .filter(|slot| keep(slot))
            .map(|slot| slot.job.clone())
            .collect();
        sort_jobs(&mut jobs);
        jobs
    }

    fn ensure_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("in-memory backend is offline".into()))
        }
    }
}

impl Default for InMemoryJobBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    async fn enqueue(
        &self,
        key: &JobKey,
        run_at: DateTime<Utc>,
        payload: JobPayload,
    ) -> Result<(), BackendError> {
        self.ensure_available()?;
        self.calls.lock().push(BackendCall::Enqueue {
            key: key.clone(),
            run_at,
        });
        let slot = Slot {
            job: ScheduledJob::new(key.clone(), run_at, payload),
            claimed_until: None,
        };
        self.jobs.write().insert(key.clone(), slot);
        Ok(())
    }

    async fn remove_if_exists(&self, key: &JobKey) -> Result<bool, BackendError> {
        self.ensure_available()?;
        self.calls
            .lock()
            .push(BackendCall::RemoveIfExists { key: key.clone() });
        Ok(self.jobs.write().remove(key).is_some())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobBackend {
    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, BackendError> {
        self.ensure_available()?;
        let mut jobs = self.jobs.write();
        let mut due: Vec<_> = jobs
            .values()
            .filter(|slot| slot.is_due(now))
            .map(|slot| slot.job.clone())
            .collect();
        sort_jobs(&mut due);
        due.truncate(limit);
        for job in &due {
            if let Some(slot) = jobs.get_mut(&job.key) {
                slot.claimed_until = Some(lease_until);
            }
        }
        Ok(due)
    }

    async fn complete(&self, job: &ScheduledJob) -> Result<bool, BackendError> {
        self.ensure_available()?;
        let mut jobs = self.jobs.write();
        if !jobs.get(&job.key).is_some_and(|slot| slot.holds(job)) {
            return Ok(false);
        }
        jobs.remove(&job.key);
        Ok(true)
    }

    async fn release(
        &self,
        job: &ScheduledJob,
        retry_at: DateTime<Utc>,
    ) -> Result<bool, BackendError> {
        self.ensure_available()?;
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job.key) {
            Some(slot) if slot.holds(job) => {
                slot.job.attempts = job.attempts + 1;
                slot.job.run_at = retry_at;
                slot.claimed_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending(&self, key: &JobKey) -> Result<Option<ScheduledJob>, BackendError> {
        self.ensure_available()?;
        Ok(self.job(key))
    }
}

fn sort_jobs(jobs: &mut [ScheduledJob]) {
    jobs.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.key.cmp(&b.key)));
}

#[async_trait]
impl<T: JobBackend + ?Sized> JobBackend for Arc<T> {
    async fn enqueue(
        &self,
        key: &JobKey,
        run_at: DateTime<Utc>,
        payload: JobPayload,
    ) -> Result<(), BackendError> {
        (**self).enqueue(key, run_at, payload).await
    }

    async fn remove_if_exists(&self, key: &JobKey) -> Result<bool, BackendError> {
        (**self).remove_if_exists(key).await
    }
}

#[async_trait]
impl<T: JobQueue + ?Sized> JobQueue for Arc<T> {
    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, BackendError> {
        (**self).take_due(now, limit, lease_until).await
    }

    async fn complete(&self, job: &ScheduledJob) -> Result<bool, BackendError> {
        (**self).complete(job).await
    }

    async fn release(
        &self,
        job: &ScheduledJob,
        retry_at: DateTime<Utc>,
    ) -> Result<bool, BackendError> {
        (**self).release(job, retry_at).await
    }

    async fn pending(&self, key: &JobKey) -> Result<Option<ScheduledJob>, BackendError> {
        (**self).pending(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap()
    }

    fn lease() -> DateTime<Utc> {
        now() + Duration::minutes(5)
    }

    #[test]
    fn test_job_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            JobKey::recurring(id).as_str(),
            "recurring:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            JobPayload::Reminder { reminder_id: id }.key(),
            JobKey::reminder(id)
        );
    }

    #[tokio::test]
    async fn test_enqueue_replaces_same_key() {
        let backend = InMemoryJobBackend::new();
        let template_id = Uuid::new_v4();
        let key = JobKey::recurring(template_id);
        let payload = JobPayload::Recurrence { template_id };

        backend.enqueue(&key, now(), payload.clone()).await.unwrap();
        backend
            .enqueue(&key, now() + Duration::days(1), payload)
            .await
            .unwrap();

        let jobs = backend.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].run_at, now() + Duration::days(1));
    }

    #[tokio::test]
    async fn test_take_due_claims_in_order() {
        let backend = InMemoryJobBackend::new();
        for offset in [3, 1, 2] {
            let template_id = Uuid::new_v4();
            backend
                .enqueue(
                    &JobKey::recurring(template_id),
                    now() - Duration::minutes(offset),
                    JobPayload::Recurrence { template_id },
                )
                .await
                .unwrap();
        }
        let future_id = Uuid::new_v4();
        backend
            .enqueue(
                &JobKey::recurring(future_id),
                now() + Duration::minutes(5),
                JobPayload::Recurrence { template_id: future_id },
            )
            .await
            .unwrap();

        let due = backend.take_due(now(), 2, lease()).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due[0].run_at < due[1].run_at);
        assert_eq!(backend.jobs().len(), 2);
        assert_eq!(backend.claimed(), due);
    }

    #[tokio::test]
    async fn test_expired_lease_is_claimed_again() {
        let backend = InMemoryJobBackend::new();
        let reminder_id = Uuid::new_v4();
        let key = JobKey::reminder(reminder_id);
        backend
            .enqueue(&key, now(), JobPayload::Reminder { reminder_id })
            .await
            .unwrap();

        assert_eq!(backend.take_due(now(), 10, lease()).await.unwrap().len(), 1);
        assert!(backend.take_due(now(), 10, lease()).await.unwrap().is_empty());

        let later = lease() + Duration::seconds(1);
        let reclaimed = backend
            .take_due(later, 10, later + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].key, key);
    }

    #[tokio::test]
    async fn test_complete_keeps_rearmed_job() {
        let backend = InMemoryJobBackend::new();
        let template_id = Uuid::new_v4();
        let key = JobKey::recurring(template_id);
        let payload = JobPayload::Recurrence { template_id };
        backend.enqueue(&key, now(), payload.clone()).await.unwrap();

        let job = backend.take_due(now(), 10, lease()).await.unwrap().remove(0);
        backend
            .enqueue(&key, now() + Duration::days(1), payload)
            .await
            .unwrap();

        assert!(!backend.complete(&job).await.unwrap());
        assert_eq!(backend.job(&key).unwrap().run_at, now() + Duration::days(1));
    }

    #[tokio::test]
    async fn test_release_skips_when_rearmed() {
        let backend = InMemoryJobBackend::new();
        let template_id = Uuid::new_v4();
        let key = JobKey::recurring(template_id);
        let payload = JobPayload::Recurrence { template_id };
        backend.enqueue(&key, now(), payload.clone()).await.unwrap();

        let job = backend.take_due(now(), 10, lease()).await.unwrap().remove(0);
        backend
            .enqueue(&key, now() + Duration::days(1), payload)
            .await
            .unwrap();

        let released = backend
            .release(&job, now() + Duration::minutes(1))
            .await
            .unwrap();
        assert!(!released);
        assert_eq!(backend.job(&key).unwrap().run_at, now() + Duration::days(1));
    }

    #[tokio::test]
    async fn test_offline_backend_fails() {
        let backend = InMemoryJobBackend::new();
        backend.set_available(false);
        let err = backend
            .remove_if_exists(&JobKey::reminder(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert!(backend.calls().is_empty());
    }
}
