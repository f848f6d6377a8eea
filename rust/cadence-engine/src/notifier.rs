//! Outbound notification contract used by reminders.

use async_trait::async_trait;

/// Fire-and-forget notification sink.
///
/// Implementations handle their own delivery failures; the reminder is
/// considered processed once `notify` returns.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, subject: &str, body: &str);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: &str, subject: &str, body: &str) {
        tracing::info!(
            user_id = %user_id,
            subject = %subject,
            body_len = body.len(),
            "Reminder notification"
        );
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub user_id: String,
    pub subject: String,
    pub body: String,
}

/// Notifier that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: parking_lot::Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, subject: &str, body: &str) {
        self.sent.lock().push(SentNotification {
            user_id: user_id.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
    }
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    async fn notify(&self, user_id: &str, subject: &str, body: &str) {
        (**self).notify(user_id, subject, body).await;
    }
}
