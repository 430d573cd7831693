//! User-visible notices.
//!
//! Failures that reach the caller are also announced once on a broadcast
//! channel so a UI layer can show them (a toast, a status line). Publishing
//! never affects control flow: with no subscribers the notice is only logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Broadcast channel capacity for notices.
const NOTICE_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Danger,
    Success,
    Info,
}

/// A single message meant for the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out hub for [`Notice`]s. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to notices published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn danger(&self, message: impl Into<String>) {
        self.publish(NoticeKind::Danger, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.publish(NoticeKind::Success, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(NoticeKind::Info, message.into());
    }

    fn publish(&self, kind: NoticeKind, message: String) {
        match kind {
            NoticeKind::Danger => warn!(%message, "Notice"),
            _ => info!(%message, "Notice"),
        }

        // No subscribers is fine.
        let _ = self.tx.send(Notice {
            kind,
            message,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_notices_in_order() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.danger("Request failed with status code 500");
        notifier.success("Listing created");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, NoticeKind::Danger);
        assert_eq!(first.message, "Request failed with status code 500");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, NoticeKind::Success);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let notifier = Notifier::new();
        notifier.info("nobody listening");
    }
}
