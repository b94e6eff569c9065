//! Penalty ledger for providers who let offers lapse.
//!
//! Late marks roll up into strikes, strikes into time-boxed suspensions.
//!
//! # Rules
//!
//! - Each late mark increments `late_marks`. Reaching `late_marks_per_strike`
//!   resets it to 0 and adds one strike.
//! - A new strike that brings `strikes` to a multiple of
//!   `strikes_per_suspension` suspends the provider for `suspension`,
//!   unless a suspension is already in force (never extended).
//! - Every late mark forces the provider offline.
//!
//! # Idempotence
//!
//! Each late mark carries an event key. The ledger keeps the most recent
//! [`RECENT_PENALTY_KEYS`] applied keys and ignores a repeat of any of them,
//! and the write is guarded on the counters it was computed from.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::availability::AvailabilityService;
use crate::error::{DispatchError, Result};
use crate::models::{Notification, NotificationKind, OfflineReason, Provider, ProviderId, Recipient};
use crate::notify::Notifier;
use crate::store::{CasResult, ProviderGuard, ProviderPatch, ProviderStore};

const WRITE_ATTEMPTS: usize = 3;

/// Number of applied event keys remembered per provider.
pub const RECENT_PENALTY_KEYS: usize = 16;

/// Thresholds of the penalty ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyPolicy {
    /// Late marks that make one strike.
    pub late_marks_per_strike: u32,
    /// Strikes that trigger a suspension.
    pub strikes_per_suspension: u32,
    /// Suspension length.
    pub suspension: Duration,
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self {
            late_marks_per_strike: 3,
            strikes_per_suspension: 3,
            suspension: Duration::hours(24),
        }
    }
}

/// Which rung of the ladder a late mark reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyOutcome {
    /// Counted toward the next strike.
    LateMark,
    /// Completed a strike.
    Strike,
    /// Completed a strike and started a suspension.
    Suspended,
}

/// Counters after applying one late mark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyAssessment {
    /// New late-mark counter.
    pub late_marks: u32,
    /// New strike counter.
    pub strikes: u32,
    /// Suspension end after the mark.
    pub suspended_until: Option<DateTime<Utc>>,
    /// Rung reached.
    pub outcome: PenaltyOutcome,
}

impl PenaltyPolicy {
    /// Evaluates one late mark against the provider's current counters.
    pub fn assess(&self, provider: &Provider, now: DateTime<Utc>) -> PenaltyAssessment {
        let mut late_marks = provider.late_marks + 1;
        let mut strikes = provider.strikes;
        let mut outcome = PenaltyOutcome::LateMark;
        let mut suspended_until = provider.suspended_until;

        if late_marks >= self.late_marks_per_strike.max(1) {
            late_marks = 0;
            strikes += 1;
            outcome = PenaltyOutcome::Strike;

            let per_suspension = self.strikes_per_suspension.max(1);
            if strikes % per_suspension == 0 && !provider.is_suspended_at(now) {
                suspended_until = Some(now + self.suspension);
                outcome = PenaltyOutcome::Suspended;
            }
        }

        PenaltyAssessment {
            late_marks,
            strikes,
            suspended_until,
            outcome,
        }
    }
}

/// Result of a ledger write.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    /// The mark was recorded.
    Applied(PenaltyAssessment),
    /// This event was already recorded.
    Duplicate,
    /// The provider no longer exists.
    ProviderMissing,
}

/// Applies late marks to stored providers.
#[derive(Clone)]
pub struct PenaltyLedger {
    providers: Arc<dyn ProviderStore>,
    availability: AvailabilityService,
    notifier: Notifier,
    policy: PenaltyPolicy,
}

impl PenaltyLedger {
    /// Creates a ledger.
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        availability: AvailabilityService,
        notifier: Notifier,
        policy: PenaltyPolicy,
    ) -> Self {
        Self {
            providers,
            availability,
            notifier,
            policy,
        }
    }

    /// The thresholds in use.
    pub fn policy(&self) -> &PenaltyPolicy {
        &self.policy
    }

    /// Records one late mark for the event `event_key`.
    pub async fn record_late_mark(
        &self,
        provider_id: &ProviderId,
        event_key: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        for _ in 0..WRITE_ATTEMPTS {
            let Some(provider) = self.providers.get(provider_id).await? else {
                return Ok(LedgerEntry::ProviderMissing);
            };
            if provider.recent_penalty_keys.iter().any(|k| k == event_key) {
                debug!(provider_id = %provider_id, event_key, "penalty already recorded");
                return Ok(LedgerEntry::Duplicate);
            }

            let assessment = self.policy.assess(&provider, now);
            let guard = ProviderGuard::any().penalties_of(&provider);
            let mut keys = provider.recent_penalty_keys.clone();
            keys.push(event_key.to_string());
            if keys.len() > RECENT_PENALTY_KEYS {
                keys.drain(..keys.len() - RECENT_PENALTY_KEYS);
            }
            let patch = ProviderPatch {
                late_marks: Some(assessment.late_marks),
                strikes: Some(assessment.strikes),
                suspended_until: Some(assessment.suspended_until),
                last_penalized_at: Some(now),
                recent_penalty_keys: Some(keys),
                ..ProviderPatch::availability(false, &provider, now)
            };

            match self.providers.update_if(provider_id, &guard, &patch).await? {
                CasResult::Success(_) => {
                    info!(
                        provider_id = %provider_id,
                        event_key,
                        late_marks = assessment.late_marks,
                        strikes = assessment.strikes,
                        outcome = ?assessment.outcome,
                        "late mark recorded"
                    );
                    self.notify(provider_id, &assessment).await;
                    if provider.reachable {
                        self.availability
                            .announce(provider_id, false, now, Some(OfflineReason::Penalized))
                            .await;
                    }
                    return Ok(LedgerEntry::Applied(assessment));
                }
                CasResult::NotFound => return Ok(LedgerEntry::ProviderMissing),
                CasResult::Mismatch => {
                    debug!(provider_id = %provider_id, event_key, "penalty write raced, retrying");
                }
            }
        }
        Err(DispatchError::PreconditionFailed(format!(
            "penalty counters of provider {provider_id} kept changing"
        )))
    }

    async fn notify(&self, provider_id: &ProviderId, assessment: &PenaltyAssessment) {
        let (kind, message) = match assessment.outcome {
            PenaltyOutcome::Suspended => (
                NotificationKind::Suspended,
                "You have been suspended for repeatedly missing requests.".to_string(),
            ),
            PenaltyOutcome::Strike => (
                NotificationKind::LateMark,
                format!(
                    "A request went unanswered. You now have {} strike(s).",
                    assessment.strikes
                ),
            ),
            PenaltyOutcome::LateMark => (
                NotificationKind::LateMark,
                format!(
                    "A request went unanswered. Late marks: {}/{}.",
                    assessment.late_marks, self.policy.late_marks_per_strike
                ),
            ),
        };
        let metadata = json!({
            "late_marks": assessment.late_marks,
            "strikes": assessment.strikes,
            "suspended_until": assessment.suspended_until,
        });
        self.notifier
            .notify(
                Notification::new(Recipient::Provider(provider_id.clone()), kind, message)
                    .with_metadata(metadata),
            )
            .await;
    }
}

impl std::fmt::Debug for PenaltyLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PenaltyLedger")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
