//! JSON file backed [`RecurrenceStore`].
//!
//! The whole store is one JSON document. Every mutation rewrites it to a
//! sibling temp file and renames it into place, so a crash leaves either the
//! old or the new document on disk and a firing is never half-written.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use cadence_engine::model::{Reminder, Template, TemplateId};
use cadence_engine::store::{RecurrenceStore, StoreSnapshot};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Store persisted as a single JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreSnapshot>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt store file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        tracing::debug!(
            path = %path.display(),
            templates = snapshot.templates.len(),
            reminders = snapshot.reminders.len(),
            "Opened JSON store"
        );

        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().await.clone()
    }

    /// Apply `change` to a copy of the state, persist it, then publish it.
    ///
    /// A change that returns `false` is discarded without touching the file.
    async fn mutate<F>(&self, change: F) -> anyhow::Result<bool>
    where
        F: FnOnce(&mut StoreSnapshot) -> bool,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        persist(&self.path, &next).await?;
        *state = next;
        Ok(true)
    }
}

async fn persist(path: &Path, snapshot: &StoreSnapshot) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot).context("failed to encode store")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;

    Ok(())
}

#[async_trait]
impl RecurrenceStore for JsonFileStore {
    async fn template(&self, id: TemplateId) -> anyhow::Result<Option<Template>> {
        Ok(self.state.lock().await.templates.get(&id).cloned())
    }

    async fn save_template(&self, template: &Template) -> anyhow::Result<()> {
        self.mutate(|s| {
            s.templates.insert(template.id(), template.clone());
            true
        })
        .await
        .map(drop)
    }

    async fn recurring_templates(&self) -> anyhow::Result<Vec<Template>> {
        Ok(self.state.lock().await.recurring_templates())
    }

    async fn commit_firing(
        &self,
        expected: &Template,
        template: &Template,
        instance: &Template,
    ) -> anyhow::Result<bool> {
        self.mutate(|s| s.apply_firing(expected, template, instance)).await
    }

    async fn instances_of(&self, template_id: TemplateId) -> anyhow::Result<Vec<Template>> {
        Ok(self.state.lock().await.instances_of(template_id))
    }

    async fn reminder(&self, id: Uuid) -> anyhow::Result<Option<Reminder>> {
        Ok(self.state.lock().await.reminders.get(&id).cloned())
    }

    async fn save_reminder(&self, reminder: &Reminder) -> anyhow::Result<()> {
        self.mutate(|s| {
            s.reminders.insert(reminder.id, reminder.clone());
            true
        })
        .await
        .map(drop)
    }
}
