//! Outbound delivery contracts.
//!
//! Three sinks carry the engine's side effects: queued notifications, push
//! messages, and live broadcast events. All three are fire-and-forget: the
//! [`Notifier`] facade logs a failed delivery and moves on, so a dispatch
//! transition never depends on delivery succeeding.

mod recording;

pub use recording::RecordingSink;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::models::{BroadcastTarget, LiveEvent, Notification, PushMessage, Recipient};

/// A failed delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The downstream service rejected or dropped the message.
    #[error("delivery rejected: {0}")]
    Rejected(String),
    /// The downstream service could not be reached.
    #[error("delivery channel unavailable: {0}")]
    Unavailable(String),
}

/// Queues notifications for later delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Enqueues a notification.
    async fn enqueue(&self, notification: Notification) -> Result<(), DeliveryError>;
}

/// Sends mobile push messages.
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Sends a push message to an account.
    async fn send_to_user(&self, recipient: &Recipient, message: PushMessage)
        -> Result<(), DeliveryError>;
}

/// Emits live events to connected clients.
#[async_trait]
pub trait LiveBroadcaster: Send + Sync {
    /// Emits an event.
    async fn emit(&self, target: BroadcastTarget, event: LiveEvent) -> Result<(), DeliveryError>;
}

/// Fire-and-forget facade over the three sinks.
#[derive(Clone)]
pub struct Notifier {
    notifications: Arc<dyn NotificationSink>,
    push: Arc<dyn PushSink>,
    broadcast: Arc<dyn LiveBroadcaster>,
}

impl Notifier {
    /// Creates a notifier from its sinks.
    pub fn new(
        notifications: Arc<dyn NotificationSink>,
        push: Arc<dyn PushSink>,
        broadcast: Arc<dyn LiveBroadcaster>,
    ) -> Self {
        Self {
            notifications,
            push,
            broadcast,
        }
    }

    /// Creates a notifier whose three sinks are the same object.
    pub fn uniform<S>(sink: Arc<S>) -> Self
    where
        S: NotificationSink + PushSink + LiveBroadcaster + 'static,
    {
        Self {
            notifications: sink.clone(),
            push: sink.clone(),
            broadcast: sink,
        }
    }

    /// Enqueues a notification; failures are logged.
    pub async fn notify(&self, notification: Notification) {
        let kind = notification.kind;
        if let Err(err) = self.notifications.enqueue(notification).await {
            warn!(?kind, error = %err, "notification enqueue failed");
        }
    }

    /// Sends a push message; failures are logged.
    pub async fn push(&self, recipient: &Recipient, message: PushMessage) {
        if let Err(err) = self.push.send_to_user(recipient, message).await {
            warn!(?recipient, error = %err, "push delivery failed");
        }
    }

    /// Emits a live event; failures are logged.
    pub async fn broadcast(&self, target: BroadcastTarget, event: LiveEvent) {
        if let Err(err) = self.broadcast.emit(target, event).await {
            warn!(error = %err, "live broadcast failed");
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
