//! Durable store contract for templates, occurrences and reminders.
//!
//! Persistence mechanics belong to the embedding application; the engine only
//! relies on [`RecurrenceStore::commit_firing`] being an atomic
//! compare-and-apply, so a firing is never half-applied and never overwrites
//! a template edited while the firing ran.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Reminder, Template, TemplateId};

/// Storage consumed by the schedulers.
#[async_trait]
pub trait RecurrenceStore: Send + Sync {
    /// Load a template (or occurrence) by id.
    async fn template(&self, id: TemplateId) -> anyhow::Result<Option<Template>>;

    /// Insert or replace a template.
    async fn save_template(&self, template: &Template) -> anyhow::Result<()>;

    /// All templates that are currently recurring.
    async fn recurring_templates(&self) -> anyhow::Result<Vec<Template>>;

    /// Atomically insert `instance` and replace the stored template with
    /// `template` (carrying its advanced descriptor), provided the stored
    /// template still equals `expected`.
    ///
    /// Returns `false`, writing nothing, when the stored template changed or
    /// disappeared since `expected` was read.
    async fn commit_firing(
        &self,
        expected: &Template,
        template: &Template,
        instance: &Template,
    ) -> anyhow::Result<bool>;

    /// Occurrences spawned from a template, oldest first.
    async fn instances_of(&self, template_id: TemplateId) -> anyhow::Result<Vec<Template>>;

    async fn reminder(&self, id: Uuid) -> anyhow::Result<Option<Reminder>>;

    async fn save_reminder(&self, reminder: &Reminder) -> anyhow::Result<()>;
}

/// Contents of a store, in a form that serializes as one document.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub templates: HashMap<TemplateId, Template>,
    /// Insertion order of occurrences per source template.
    #[serde(default)]
    pub instances: HashMap<TemplateId, Vec<TemplateId>>,
    #[serde(default)]
    pub reminders: HashMap<Uuid, Reminder>,
}

impl StoreSnapshot {
    /// Apply a firing to the snapshot if the stored template still equals
    /// `expected`.
    pub fn apply_firing(
        &mut self,
        expected: &Template,
        template: &Template,
        instance: &Template,
    ) -> bool {
        if self.templates.get(&template.id()) != Some(expected) {
            return false;
        }
        self.templates.insert(template.id(), template.clone());
        self.templates.insert(instance.id(), instance.clone());
        self.instances
            .entry(template.id())
            .or_default()
            .push(instance.id());
        true
    }

    #[must_use]
    pub fn recurring_templates(&self) -> Vec<Template> {
        let mut templates: Vec<_> = self
            .templates
            .values()
            .filter(|t| t.active_recurrence().is_some())
            .cloned()
            .collect();
        templates.sort_by_key(Template::id);
        templates
    }

    #[must_use]
    pub fn instances_of(&self, template_id: TemplateId) -> Vec<Template> {
        self.instances
            .get(&template_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.templates.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-memory store for embedding and testing.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: parking_lot::RwLock<StoreSnapshot>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.read().clone()
    }
}

#[async_trait]
impl RecurrenceStore for InMemoryStore {
    async fn template(&self, id: TemplateId) -> anyhow::Result<Option<Template>> {
        Ok(self.state.read().templates.get(&id).cloned())
    }

    async fn save_template(&self, template: &Template) -> anyhow::Result<()> {
        self.state
            .write()
            .templates
            .insert(template.id(), template.clone());
        Ok(())
    }

    async fn recurring_templates(&self) -> anyhow::Result<Vec<Template>> {
        Ok(self.state.read().recurring_templates())
    }

    async fn commit_firing(
        &self,
        expected: &Template,
        template: &Template,
        instance: &Template,
    ) -> anyhow::Result<bool> {
        Ok(self.state.write().apply_firing(expected, template, instance))
    }

    async fn instances_of(&self, template_id: TemplateId) -> anyhow::Result<Vec<Template>> {
        Ok(self.state.read().instances_of(template_id))
    }

    async fn reminder(&self, id: Uuid) -> anyhow::Result<Option<Reminder>> {
        Ok(self.state.read().reminders.get(&id).cloned())
    }

    async fn save_reminder(&self, reminder: &Reminder) -> anyhow::Result<()> {
        self.state
            .write()
            .reminders
            .insert(reminder.id, reminder.clone());
        Ok(())
    }
}

#[async_trait]
impl<T: RecurrenceStore + ?Sized> RecurrenceStore for Arc<T> {
    async fn template(&self, id: TemplateId) -> anyhow::Result<Option<Template>> {
        (**self).template(id).await
    }

    async fn save_template(&self, template: &Template) -> anyhow::Result<()> {
        (**self).save_template(template).await
    }

    async fn recurring_templates(&self) -> anyhow::Result<Vec<Template>> {
        (**self).recurring_templates().await
    }

    async fn commit_firing(
        &self,
        expected: &Template,
        template: &Template,
        instance: &Template,
    ) -> anyhow::Result<bool> {
        (**self).commit_firing(expected, template, instance).await
    }

    async fn instances_of(&self, template_id: TemplateId) -> anyhow::Result<Vec<Template>> {
        (**self).instances_of(template_id).await
    }

    async fn reminder(&self, id: Uuid) -> anyhow::Result<Option<Reminder>> {
        (**self).reminder(id).await
    }

    async fn save_reminder(&self, reminder: &Reminder) -> anyhow::Result<()> {
        (**self).save_reminder(reminder).await
    }
}
