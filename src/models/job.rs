//! Job request model.
//!
//! A job request is a client's ask for a skill at a time. Immediate requests
//! carry an [`Offer`] tracking which provider currently holds the request,
//! who has already been asked, and when the offer and the request expire.
//!
//! # Offer Timers
//! - `current_offer_at + fallback_timeout`: when the current provider loses
//!   the offer. Refreshed on every reassignment.
//! - `expires_at`: total time-to-live, fixed at creation and never extended.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{CandidateCriteria, ClientId, JobId, ProviderId};

/// Lifecycle status of a job request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for the current provider's answer.
    #[default]
    Pending,
    /// The provider took the job.
    Accepted,
    /// The provider declined the job.
    Rejected,
    /// Work finished.
    Completed,
    /// Withdrawn, typically on expiry.
    Canceled,
}

impl JobStatus {
    /// Whether a job in this status blocks the provider's time slot.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

/// Offer bookkeeping of an immediate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// When the first provider was asked.
    pub first_offered_at: DateTime<Utc>,
    /// When the current provider was asked.
    pub current_offer_at: DateTime<Utc>,
    /// Total expiry of the request.
    pub expires_at: DateTime<Utc>,
    /// Every provider ever asked, in offer order. Only grows.
    pub offered_providers: Vec<ProviderId>,
    /// Number of successful reassignments.
    pub fallback_count: u32,
    /// When the request was canceled for expiry.
    pub expired_at: Option<DateTime<Utc>>,
}

impl Offer {
    /// Opens the first offer to `provider`.
    pub fn open(provider: ProviderId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            first_offered_at: now,
            current_offer_at: now,
            expires_at: now + ttl,
            offered_providers: vec![provider],
            fallback_count: 0,
            expired_at: None,
        }
    }

    /// Whether the total time-to-live has elapsed.
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the current provider's time to answer is up and the
    /// request is still alive.
    pub fn fallback_due(&self, now: DateTime<Utc>, fallback_timeout: Duration) -> bool {
        now - self.current_offer_at >= fallback_timeout && !self.is_expired(now)
    }

    /// Whether `provider` has ever been offered this request.
    pub fn has_offered(&self, provider: &ProviderId) -> bool {
        self.offered_providers.contains(provider)
    }

    /// Providers that must not be asked again.
    pub fn exclusions(&self, current: &ProviderId) -> HashSet<ProviderId> {
        self.offered_providers
            .iter()
            .chain(std::iter::once(current))
            .cloned()
            .collect()
    }

    /// The offer after handing the request to `provider`.
    ///
    /// `expires_at` and `first_offered_at` are carried over unchanged.
    pub fn reassigned(&self, provider: ProviderId, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if !next.has_offered(&provider) {
            next.offered_providers.push(provider);
        }
        next.current_offer_at = now;
        next.fallback_count += 1;
        next
    }

    /// The offer stamped as expired.
    pub fn expired(&self, now: DateTime<Utc>) -> Self {
        Self {
            expired_at: Some(now),
            ..self.clone()
        }
    }
}

/// A client's request before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobRequest {
    /// Requesting client.
    pub client_id: ClientId,
    /// Requested skill.
    pub skill: String,
    /// Execution time. `None` = now.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Free-text note.
    pub note: String,
    /// Where the work happens.
    pub address: String,
    /// Qualification criteria for candidates.
    pub criteria: CandidateCriteria,
}

impl NewJobRequest {
    /// Creates an immediate request for a skill.
    pub fn new(client_id: impl Into<ClientId>, skill: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            skill: skill.into(),
            scheduled_at: None,
            note: String::new(),
            address: String::new(),
            criteria: CandidateCriteria::default(),
        }
    }

    /// Sets the note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Sets the address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the candidate criteria.
    pub fn with_criteria(mut self, criteria: CandidateCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Sets the execution time.
    pub fn at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }
}

/// A persisted job request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Unique job identifier.
    pub id: JobId,
    /// Requesting client.
    pub client_id: ClientId,
    /// Requested skill.
    pub skill: String,
    /// Execution time slot.
    pub scheduled_at: DateTime<Utc>,
    /// Free-text note.
    pub note: String,
    /// Where the work happens.
    pub address: String,
    /// Subject to time-boxed dispatch.
    pub is_immediate: bool,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Provider currently holding the request.
    pub current_provider: ProviderId,
    /// Offer bookkeeping (immediate requests only).
    pub offer: Option<Offer>,
    /// Qualification criteria used for every offer round.
    pub criteria: CandidateCriteria,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Why the request was canceled.
    pub cancel_reason: Option<String>,
}

impl JobRequest {
    /// Creates an immediate request offered to `provider`.
    pub fn immediate(
        request: NewJobRequest,
        provider: ProviderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: JobId::generate(),
            client_id: request.client_id,
            skill: request.skill,
            scheduled_at: request.scheduled_at.unwrap_or(now),
            note: request.note,
            address: request.address,
            is_immediate: true,
            status: JobStatus::Pending,
            offer: Some(Offer::open(provider.clone(), now, ttl)),
            current_provider: provider,
            criteria: request.criteria,
            created_at: now,
            cancel_reason: None,
        }
    }

    /// Creates a pre-scheduled booking addressed to `provider`.
    pub fn scheduled(request: NewJobRequest, provider: ProviderId, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::generate(),
            client_id: request.client_id,
            skill: request.skill,
            scheduled_at: request.scheduled_at.unwrap_or(now),
            note: request.note,
            address: request.address,
            is_immediate: false,
            status: JobStatus::Pending,
            current_provider: provider,
            offer: None,
            criteria: request.criteria,
            created_at: now,
            cancel_reason: None,
        }
    }

    /// Overrides the identifier.
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether the request is still waiting for an answer.
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    /// Number of reassignments so far.
    pub fn fallback_count(&self) -> u32 {
        self.offer.as_ref().map_or(0, |o| o.fallback_count)
    }
}
