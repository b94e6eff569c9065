//! Outbound messages produced by the engine.
//!
//! The engine only describes what should be delivered. Delivery belongs to
//! the sinks in [`crate::notify`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClientId, JobId, ProviderId};

/// Who a message is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// A provider account.
    Provider(ProviderId),
    /// A client account.
    Client(ClientId),
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// A provider received a fresh immediate request.
    OfferReceived,
    /// The client's request moved to another provider.
    OfferReassigned,
    /// An immediate request ran out of time.
    RequestExpired,
    /// A scheduled booking was never answered.
    RequestUnanswered,
    /// A provider was given a late mark (possibly completing a strike).
    LateMark,
    /// A provider was suspended.
    Suspended,
    /// A provider was taken offline for inactivity.
    WentOffline,
}

/// A queued notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Addressee.
    pub recipient: Recipient,
    /// Message class.
    pub kind: NotificationKind,
    /// Human-readable body.
    pub message: String,
    /// Structured payload for clients.
    pub metadata: serde_json::Value,
}

impl Notification {
    /// Creates a notification without metadata.
    pub fn new(recipient: Recipient, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            recipient,
            kind,
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attaches structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A mobile push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Structured payload.
    pub data: serde_json::Value,
}

impl PushMessage {
    /// Creates a push payload.
    pub fn new(title: impl Into<String>, body: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data,
        }
    }
}

/// Audience of a live event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastTarget {
    /// Every connected client (e.g. live maps).
    Everyone,
    /// One account.
    Only(Recipient),
}

/// Why a provider went offline without toggling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfflineReason {
    /// No heartbeat within the inactivity threshold.
    Inactivity,
    /// A schedule window ended.
    ScheduleBoundary,
    /// A penalty was recorded.
    Penalized,
}

/// A best-effort live update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A provider's availability flag flipped.
    AvailabilityChanged {
        /// The provider.
        provider_id: ProviderId,
        /// New flag value.
        reachable: bool,
        /// When the flip happened.
        timestamp: DateTime<Utc>,
    },
    /// Sent to the provider's own client to explain a forced flip.
    ForcedOffline {
        /// The provider.
        provider_id: ProviderId,
        /// Why.
        reason: OfflineReason,
        /// When.
        timestamp: DateTime<Utc>,
    },
    /// A request was offered to a provider.
    OfferCreated {
        /// The request.
        job_id: JobId,
        /// The provider now holding it.
        provider_id: ProviderId,
    },
    /// A request moved from one provider to another.
    OfferReassigned {
        /// The request.
        job_id: JobId,
        /// Previous holder.
        from: ProviderId,
        /// New holder.
        to: ProviderId,
        /// Reassignments so far.
        fallback_count: u32,
    },
    /// A request expired without acceptance.
    RequestExpired {
        /// The request.
        job_id: JobId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_builder() {
        let n = Notification::new(
            Recipient::Provider("P1".into()),
            NotificationKind::LateMark,
            "late mark recorded",
        )
        .with_metadata(json!({ "late_marks": 1 }));

        assert_eq!(n.kind, NotificationKind::LateMark);
        assert_eq!(n.metadata["late_marks"], 1);
    }

    #[test]
    fn test_live_event_is_tagged() {
        let event = LiveEvent::RequestExpired { job_id: "J1".into() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "request_expired");
        assert_eq!(value["job_id"], "J1");
    }
}
