//! A sink that keeps everything it receives.
//!
//! Useful for tests and for running the engine without delivery backends.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{DeliveryError, LiveBroadcaster, NotificationSink, PushSink};
use crate::models::{BroadcastTarget, LiveEvent, Notification, NotificationKind, PushMessage, Recipient};

/// Records notifications, pushes and live events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
    pushes: Mutex<Vec<(Recipient, PushMessage)>>,
    events: Mutex<Vec<(BroadcastTarget, LiveEvent)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far.
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    /// Notifications of one kind.
    pub fn notifications_of(&self, kind: NotificationKind) -> Vec<Notification> {
        lock(&self.notifications)
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    /// Push messages received so far.
    pub fn pushes(&self) -> Vec<(Recipient, PushMessage)> {
        lock(&self.pushes).clone()
    }

    /// Live events received so far.
    pub fn events(&self) -> Vec<(BroadcastTarget, LiveEvent)> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn enqueue(&self, notification: Notification) -> Result<(), DeliveryError> {
        lock(&self.notifications).push(notification);
        Ok(())
    }
}

#[async_trait]
impl PushSink for RecordingSink {
    async fn send_to_user(
        &self,
        recipient: &Recipient,
        message: PushMessage,
    ) -> Result<(), DeliveryError> {
        lock(&self.pushes).push((recipient.clone(), message));
        Ok(())
    }
}

#[async_trait]
impl LiveBroadcaster for RecordingSink {
    async fn emit(&self, target: BroadcastTarget, event: LiveEvent) -> Result<(), DeliveryError> {
        lock(&self.events).push((target, event));
        Ok(())
    }
}
