//! Dispatch and fallback orchestration for job requests.
//!
//! # Lifecycle
//!
//! ```text
//! Pending(offer) ──accept──▶ Accepted
//!       │        ──reject──▶ Rejected
//!       │        ──expiry──▶ Canceled
//!       └──fallback──▶ Pending(offer')
//! ```
//!
//! Every transition is a conditional write guarded on the status and holder
//! the decision was made from. A lost race is reported, never retried
//! inline; the dispatch ticker re-reads on its next cycle.
//!
//! The late-mark penalty of a fallback is recorded before the reassignment
//! write and keyed by `job id # fallback count`, so a repeated attempt for
//! the same round cannot count twice.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::dispatching::CandidateSelector;
use crate::error::{DispatchError, Result};
use crate::models::{
    BroadcastTarget, JobId, JobRequest, JobStatus, LiveEvent, NewJobRequest, Notification,
    NotificationKind, ProviderId, PushMessage, Recipient,
};
use crate::notify::Notifier;
use crate::penalty::PenaltyLedger;
use crate::store::{CasResult, JobGuard, JobPatch, JobStore};

/// Cancellation note for requests that ran out of time.
const EXPIRED_REASON: &str = "expired: no provider accepted in time";
/// Cancellation note for scheduled bookings nobody answered.
const UNANSWERED_REASON: &str = "canceled: provider did not respond";

/// Timers of the offer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferTiming {
    /// Time a provider has to answer before the request moves on.
    pub fallback_timeout: Duration,
    /// Total lifetime of an immediate request.
    pub offer_ttl: Duration,
    /// Lifetime of an unanswered scheduled booking.
    pub scheduled_pending_ttl: Duration,
}

impl Default for OfferTiming {
    fn default() -> Self {
        Self {
            fallback_timeout: Duration::minutes(5),
            offer_ttl: Duration::minutes(15),
            scheduled_pending_ttl: Duration::hours(24),
        }
    }
}

/// What a fallback attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    /// The request moved to a new provider.
    Reassigned {
        /// Previous holder (penalized).
        from: ProviderId,
        /// New holder.
        to: ProviderId,
    },
    /// Nobody else is available; retried next cycle.
    NoCandidate,
    /// The request was past its lifetime and got canceled instead.
    Expired,
    /// Not pending, not immediate, or not due yet.
    Skipped,
    /// The request changed between read and write.
    Raced,
}

/// Owns the lifecycle of job requests.
#[derive(Clone)]
pub struct DispatchOrchestrator {
    jobs: Arc<dyn JobStore>,
    selector: CandidateSelector,
    penalties: PenaltyLedger,
    notifier: Notifier,
    timing: OfferTiming,
}

impl DispatchOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        selector: CandidateSelector,
        penalties: PenaltyLedger,
        notifier: Notifier,
        timing: OfferTiming,
    ) -> Self {
        Self {
            jobs,
            selector,
            penalties,
            notifier,
            timing,
        }
    }

    /// The timers in use.
    pub fn timing(&self) -> &OfferTiming {
        &self.timing
    }

    /// Creates an immediate request and offers it to the best candidate.
    ///
    /// Fails with [`DispatchError::NoCandidateAvailable`] when nobody can
    /// take it; no record is stored in that case.
    pub async fn create_immediate(
        &self,
        request: NewJobRequest,
        now: DateTime<Utc>,
    ) -> Result<JobRequest> {
        let at = request.scheduled_at.unwrap_or(now);
        let candidate = self
            .selector
            .select(&request.skill, at, &HashSet::new(), &request.criteria, now)
            .await?
            .ok_or_else(|| DispatchError::NoCandidateAvailable {
                skill: request.skill.clone(),
            })?;

        let job = JobRequest::immediate(request, candidate.id, now, self.timing.offer_ttl);
        self.jobs.create(&job).await?;
        info!(job_id = %job.id, provider_id = %job.current_provider, "immediate request offered");

        self.offer_to(&job, &job.current_provider).await;
        Ok(job)
    }

    /// Stores a scheduled booking addressed to a chosen provider.
    pub async fn book_scheduled(
        &self,
        request: NewJobRequest,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<JobRequest> {
        let job = JobRequest::scheduled(request, provider, now);
        self.jobs.create(&job).await?;
        info!(job_id = %job.id, provider_id = %job.current_provider, "scheduled booking stored");
        Ok(job)
    }

    /// Pending immediate requests whose current offer timed out.
    pub async fn due_for_fallback(&self, now: DateTime<Utc>) -> Result<Vec<JobRequest>> {
        self.jobs
            .find_due_for_fallback(now, self.timing.fallback_timeout)
            .await
    }

    /// Pending immediate requests past their lifetime.
    pub async fn due_for_expiry(&self, now: DateTime<Utc>) -> Result<Vec<JobRequest>> {
        self.jobs.find_expired(now).await
    }

    /// Scheduled bookings left pending too long.
    pub async fn stale_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<JobRequest>> {
        self.jobs
            .find_stale_scheduled(now - self.timing.scheduled_pending_ttl)
            .await
    }

    /// Moves a timed-out request to the next candidate.
    ///
    /// `snapshot` identifies the request; the decision is made on a fresh
    /// read so that an answer given since the scan is never penalized.
    pub async fn fallback(
        &self,
        snapshot: &JobRequest,
        now: DateTime<Utc>,
    ) -> Result<FallbackOutcome> {
        let Some(job) = self.jobs.get(&snapshot.id).await? else {
            return Ok(FallbackOutcome::Skipped);
        };
        let job = &job;
        let Some(offer) = job.offer.as_ref().filter(|_| job.is_pending() && job.is_immediate)
        else {
            return Ok(FallbackOutcome::Skipped);
        };
        if offer.is_expired(now) {
            return Ok(if self.expire(job, now).await? {
                FallbackOutcome::Expired
            } else {
                FallbackOutcome::Skipped
            });
        }
        if !offer.fallback_due(now, self.timing.fallback_timeout) {
            return Ok(FallbackOutcome::Skipped);
        }

        let excluded = offer.exclusions(&job.current_provider);
        let Some(candidate) = self
            .selector
            .select(&job.skill, job.scheduled_at, &excluded, &job.criteria, now)
            .await?
        else {
            debug!(job_id = %job.id, "no fallback candidate, retrying next cycle");
            return Ok(FallbackOutcome::NoCandidate);
        };

        let from = job.current_provider.clone();
        let event_key = format!("{}#{}", job.id, offer.fallback_count);
        self.penalties.record_late_mark(&from, &event_key, now).await?;

        let guard = JobGuard::pending_with(&from).after_fallbacks(offer.fallback_count);
        let patch = JobPatch {
            current_provider: Some(candidate.id.clone()),
            offer: Some(offer.reassigned(candidate.id.clone(), now)),
            ..JobPatch::default()
        };
        let updated = match self.jobs.update_if(&job.id, &guard, &patch).await? {
            CasResult::Success(updated) => updated,
            CasResult::Mismatch => {
                debug!(job_id = %job.id, "request changed before reassignment");
                return Ok(FallbackOutcome::Raced);
            }
            CasResult::NotFound => return Ok(FallbackOutcome::Skipped),
        };

        let to = candidate.id;
        info!(
            job_id = %job.id,
            from = %from,
            to = %to,
            fallback_count = updated.fallback_count(),
            "request reassigned"
        );
        self.offer_to(&updated, &to).await;

        let client = Recipient::Client(updated.client_id.clone());
        self.notifier
            .notify(
                Notification::new(
                    client.clone(),
                    NotificationKind::OfferReassigned,
                    "The provider did not respond in time. Your request was passed to another provider.",
                )
                .with_metadata(json!({ "job_id": updated.id, "provider_id": to })),
            )
            .await;
        self.notifier
            .broadcast(
                BroadcastTarget::Only(client),
                LiveEvent::OfferReassigned {
                    job_id: updated.id.clone(),
                    from: from.clone(),
                    to: to.clone(),
                    fallback_count: updated.fallback_count(),
                },
            )
            .await;

        Ok(FallbackOutcome::Reassigned { from, to })
    }

    /// Cancels a request past its lifetime. Returns whether this call did it.
    pub async fn expire(&self, job: &JobRequest, now: DateTime<Utc>) -> Result<bool> {
        let Some(offer) = job.offer.as_ref() else {
            return Ok(false);
        };
        if !job.is_pending() || !offer.is_expired(now) || offer.expired_at.is_some() {
            return Ok(false);
        }

        let guard = JobGuard::pending_with(&job.current_provider);
        let patch = JobPatch {
            status: Some(JobStatus::Canceled),
            offer: Some(offer.expired(now)),
            cancel_reason: Some(EXPIRED_REASON.to_string()),
            ..JobPatch::default()
        };
        if !self.jobs.update_if(&job.id, &guard, &patch).await?.is_success() {
            debug!(job_id = %job.id, "request changed before expiry");
            return Ok(false);
        }

        info!(job_id = %job.id, fallback_count = job.fallback_count(), "request expired");
        let client = Recipient::Client(job.client_id.clone());
        self.notifier
            .notify(
                Notification::new(
                    client.clone(),
                    NotificationKind::RequestExpired,
                    "Your request expired: no provider accepted it in time.",
                )
                .with_metadata(json!({ "job_id": job.id })),
            )
            .await;
        self.notifier
            .push(
                &client,
                PushMessage::new(
                    "Request expired",
                    "No provider accepted your request in time.",
                    json!({ "job_id": job.id }),
                ),
            )
            .await;
        self.notifier
            .broadcast(
                BroadcastTarget::Only(client),
                LiveEvent::RequestExpired {
                    job_id: job.id.clone(),
                },
            )
            .await;
        Ok(true)
    }

    /// Cancels a scheduled booking left pending too long.
    pub async fn cancel_unanswered_scheduled(
        &self,
        job: &JobRequest,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let stale = now - job.created_at >= self.timing.scheduled_pending_ttl;
        if !job.is_pending() || job.is_immediate || !stale {
            return Ok(false);
        }

        let guard = JobGuard::pending_with(&job.current_provider);
        let patch = JobPatch {
            status: Some(JobStatus::Canceled),
            cancel_reason: Some(UNANSWERED_REASON.to_string()),
            ..JobPatch::default()
        };
        if !self.jobs.update_if(&job.id, &guard, &patch).await?.is_success() {
            return Ok(false);
        }

        info!(job_id = %job.id, provider_id = %job.current_provider, "scheduled booking unanswered");
        self.notifier
            .notify(
                Notification::new(
                    Recipient::Client(job.client_id.clone()),
                    NotificationKind::RequestUnanswered,
                    "Your booking was canceled because the provider did not respond.",
                )
                .with_metadata(json!({ "job_id": job.id })),
            )
            .await;
        Ok(true)
    }

    /// The holder takes the request.
    pub async fn accept_offer(
        &self,
        job_id: &JobId,
        provider: &ProviderId,
        now: DateTime<Utc>,
    ) -> Result<JobRequest> {
        let job = self.respond(job_id, provider, JobStatus::Accepted).await?;
        info!(job_id = %job_id, provider_id = %provider, %now, "offer accepted");
        Ok(job)
    }

    /// The holder declines the request.
    pub async fn reject_offer(
        &self,
        job_id: &JobId,
        provider: &ProviderId,
        now: DateTime<Utc>,
    ) -> Result<JobRequest> {
        let job = self.respond(job_id, provider, JobStatus::Rejected).await?;
        info!(job_id = %job_id, provider_id = %provider, %now, "offer rejected");
        Ok(job)
    }

    async fn respond(
        &self,
        job_id: &JobId,
        provider: &ProviderId,
        status: JobStatus,
    ) -> Result<JobRequest> {
        let patch = JobPatch {
            status: Some(status),
            ..JobPatch::default()
        };
        match self
            .jobs
            .update_if(job_id, &JobGuard::pending_with(provider), &patch)
            .await?
        {
            CasResult::Success(job) => Ok(job),
            CasResult::NotFound => Err(DispatchError::JobNotFound(job_id.clone())),
            CasResult::Mismatch => Err(DispatchError::PreconditionFailed(format!(
                "job request {job_id} is no longer pending with provider {provider}"
            ))),
        }
    }

    async fn offer_to(&self, job: &JobRequest, provider: &ProviderId) {
        let recipient = Recipient::Provider(provider.clone());
        let respond_within = self.timing.fallback_timeout.num_seconds();
        let data = json!({ "job_id": job.id, "respond_within_secs": respond_within });

        self.notifier
            .notify(
                Notification::new(
                    recipient.clone(),
                    NotificationKind::OfferReceived,
                    format!(
                        "New immediate request for {}. Respond within {} minutes.",
                        job.skill,
                        respond_within / 60
                    ),
                )
                .with_metadata(data.clone()),
            )
            .await;
        self.notifier
            .push(
                &recipient,
                PushMessage::new("New request", format!("Immediate {} request", job.skill), data),
            )
            .await;
        self.notifier
            .broadcast(
                BroadcastTarget::Only(recipient),
                LiveEvent::OfferCreated {
                    job_id: job.id.clone(),
                    provider_id: provider.clone(),
                },
            )
            .await;
    }
}

impl std::fmt::Debug for DispatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchOrchestrator")
            .field("selector", &self.selector)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}
