//! Storage contracts for provider and job request records.
//!
//! The engine never holds records across cycles. Every ticker re-reads,
//! decides, and writes back through a conditional update whose guard names
//! the prior values the decision was based on.
//!
//! ## CAS Semantics
//!
//! `update_if` applies a patch only when the stored record still matches the
//! guard. A lost race is reported as [`CasResult::Mismatch`], not as an error;
//! the caller skips the record and re-evaluates on the next cycle.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::{
    AvailabilityStrategy, JobId, JobRequest, JobStatus, Offer, Provider, ProviderId,
    WeeklySchedule,
};

/// Result of a compare-and-swap update.
#[derive(Debug, Clone, PartialEq)]
pub enum CasResult<T> {
    /// The patch was applied; carries the updated record.
    Success(T),
    /// The record does not exist.
    NotFound,
    /// The record exists but no longer matches the guard.
    Mismatch,
}

impl<T> CasResult<T> {
    /// Returns true if the update was applied.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The updated record, if the update was applied.
    pub fn into_record(self) -> Option<T> {
        match self {
            Self::Success(record) => Some(record),
            _ => None,
        }
    }
}

/// Expected prior values for a provider update. `None` fields are not checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderGuard {
    /// Expected availability flag.
    pub reachable: Option<bool>,
    /// Expected strategy.
    pub strategy: Option<AvailabilityStrategy>,
    /// Expected `reachable_since`.
    pub reachable_since: Option<Option<DateTime<Utc>>>,
    /// Expected last heartbeat.
    pub last_activity_at: Option<Option<DateTime<Utc>>>,
    /// Expected late-mark counter.
    pub late_marks: Option<u32>,
    /// Expected strike counter.
    pub strikes: Option<u32>,
    /// Expected recent penalty keys.
    pub recent_penalty_keys: Option<Vec<String>>,
}

impl ProviderGuard {
    /// A guard that always matches.
    pub fn any() -> Self {
        Self::default()
    }

    /// Expects the given availability flag.
    pub fn reachable(mut self, reachable: bool) -> Self {
        self.reachable = Some(reachable);
        self
    }

    /// Expects the given strategy.
    pub fn strategy(mut self, strategy: AvailabilityStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Expects the availability state read from `provider`: flag,
    /// strategy and `reachable_since`.
    pub fn availability_of(mut self, provider: &Provider) -> Self {
        self.reachable = Some(provider.reachable);
        self.strategy = Some(provider.strategy);
        self.reachable_since = Some(provider.reachable_since);
        self
    }

    /// Expects the last heartbeat read from `provider`.
    pub fn activity_of(mut self, provider: &Provider) -> Self {
        self.last_activity_at = Some(provider.last_activity_at);
        self
    }

    /// Expects the penalty state read from `provider`.
    pub fn penalties_of(mut self, provider: &Provider) -> Self {
        self.late_marks = Some(provider.late_marks);
        self.strikes = Some(provider.strikes);
        self.recent_penalty_keys = Some(provider.recent_penalty_keys.clone());
        self
    }

    /// Whether `provider` satisfies the guard.
    pub fn matches(&self, provider: &Provider) -> bool {
        self.reachable.map_or(true, |v| provider.reachable == v)
            && self.strategy.map_or(true, |v| provider.strategy == v)
            && self
                .reachable_since
                .map_or(true, |v| provider.reachable_since == v)
            && self
                .last_activity_at
                .map_or(true, |v| provider.last_activity_at == v)
            && self.late_marks.map_or(true, |v| provider.late_marks == v)
            && self.strikes.map_or(true, |v| provider.strikes == v)
            && self
                .recent_penalty_keys
                .as_ref()
                .map_or(true, |v| &provider.recent_penalty_keys == v)
    }
}

/// Field set for a provider update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPatch {
    /// New availability flag.
    pub reachable: Option<bool>,
    /// New strategy.
    pub strategy: Option<AvailabilityStrategy>,
    /// New weekly schedule.
    pub schedule: Option<WeeklySchedule>,
    /// New `reachable_since` (`Some(None)` clears it).
    pub reachable_since: Option<Option<DateTime<Utc>>>,
    /// New heartbeat time.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// New late-mark counter.
    pub late_marks: Option<u32>,
    /// New strike counter.
    pub strikes: Option<u32>,
    /// New suspension end (`Some(None)` clears it).
    pub suspended_until: Option<Option<DateTime<Utc>>>,
    /// New penalty time.
    pub last_penalized_at: Option<DateTime<Utc>>,
    /// New recent penalty keys.
    pub recent_penalty_keys: Option<Vec<String>>,
}

impl ProviderPatch {
    /// Sets the availability flag together with `reachable_since`.
    ///
    /// Going online keeps an existing `since` when already online.
    pub fn availability(reachable: bool, current: &Provider, now: DateTime<Utc>) -> Self {
        let since = if !reachable {
            None
        } else if current.reachable {
            current.reachable_since.or(Some(now))
        } else {
            Some(now)
        };
        Self {
            reachable: Some(reachable),
            reachable_since: Some(since),
            ..Self::default()
        }
    }

    /// Also sets the strategy.
    pub fn with_strategy(mut self, strategy: AvailabilityStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Applies the patch in place.
    pub fn apply(&self, provider: &mut Provider) {
        if let Some(v) = self.reachable {
            provider.reachable = v;
        }
        if let Some(v) = self.strategy {
            provider.strategy = v;
        }
        if let Some(v) = &self.schedule {
            provider.schedule = v.clone();
        }
        if let Some(v) = self.reachable_since {
            provider.reachable_since = v;
        }
        if let Some(v) = self.last_activity_at {
            provider.last_activity_at = Some(v);
        }
        if let Some(v) = self.late_marks {
            provider.late_marks = v;
        }
        if let Some(v) = self.strikes {
            provider.strikes = v;
        }
        if let Some(v) = self.suspended_until {
            provider.suspended_until = v;
        }
        if let Some(v) = self.last_penalized_at {
            provider.last_penalized_at = Some(v);
        }
        if let Some(v) = &self.recent_penalty_keys {
            provider.recent_penalty_keys = v.clone();
        }
    }
}

/// Expected prior values for a job update.
#[derive(Debug, Clone, PartialEq)]
pub struct JobGuard {
    /// Expected status.
    pub status: JobStatus,
    /// Expected holder.
    pub current_provider: Option<ProviderId>,
    /// Expected reassignment count.
    pub fallback_count: Option<u32>,
}

impl JobGuard {
    /// Expects a status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            current_provider: None,
            fallback_count: None,
        }
    }

    /// Expects a pending request held by `provider`.
    pub fn pending_with(provider: &ProviderId) -> Self {
        Self::status(JobStatus::Pending).held_by(provider)
    }

    /// Expects a holder.
    pub fn held_by(mut self, provider: &ProviderId) -> Self {
        self.current_provider = Some(provider.clone());
        self
    }

    /// Expects a reassignment count.
    pub fn after_fallbacks(mut self, count: u32) -> Self {
        self.fallback_count = Some(count);
        self
    }

    /// Whether `job` satisfies the guard.
    pub fn matches(&self, job: &JobRequest) -> bool {
        job.status == self.status
            && self
                .current_provider
                .as_ref()
                .map_or(true, |p| &job.current_provider == p)
            && self
                .fallback_count
                .map_or(true, |c| job.fallback_count() == c)
    }
}

/// Field set for a job update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    /// New status.
    pub status: Option<JobStatus>,
    /// New holder.
    pub current_provider: Option<ProviderId>,
    /// Replacement offer.
    pub offer: Option<Offer>,
    /// Cancellation note.
    pub cancel_reason: Option<String>,
}

impl JobPatch {
    /// Applies the patch in place.
    pub fn apply(&self, job: &mut JobRequest) {
        if let Some(v) = self.status {
            job.status = v;
        }
        if let Some(v) = &self.current_provider {
            job.current_provider = v.clone();
        }
        if let Some(v) = &self.offer {
            job.offer = Some(v.clone());
        }
        if let Some(v) = &self.cancel_reason {
            job.cancel_reason = Some(v.clone());
        }
    }
}

/// Provider persistence.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Gets a provider by ID.
    async fn get(&self, id: &ProviderId) -> Result<Option<Provider>>;

    /// Inserts or replaces a provider.
    async fn save(&self, provider: &Provider) -> Result<()>;

    /// Providers offering a skill.
    async fn find_by_skill(&self, skill: &str) -> Result<Vec<Provider>>;

    /// Providers governed by a strategy.
    async fn find_by_strategy(&self, strategy: AvailabilityStrategy) -> Result<Vec<Provider>>;

    /// Reachable providers with a `reachable_since` timestamp.
    async fn find_online(&self) -> Result<Vec<Provider>>;

    /// Conditionally applies `patch`.
    async fn update_if(
        &self,
        id: &ProviderId,
        guard: &ProviderGuard,
        patch: &ProviderPatch,
    ) -> Result<CasResult<Provider>>;
}

/// Job request persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stores a new request.
    async fn create(&self, job: &JobRequest) -> Result<()>;

    /// Gets a request by ID.
    async fn get(&self, id: &JobId) -> Result<Option<JobRequest>>;

    /// Pending immediate requests whose current offer is at least
    /// `fallback_timeout` old and whose total expiry is still ahead.
    async fn find_due_for_fallback(
        &self,
        now: DateTime<Utc>,
        fallback_timeout: Duration,
    ) -> Result<Vec<JobRequest>>;

    /// Pending immediate requests past their total expiry and not yet stamped.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobRequest>>;

    /// Pending non-immediate requests created at or before `created_before`.
    async fn find_stale_scheduled(&self, created_before: DateTime<Utc>)
        -> Result<Vec<JobRequest>>;

    /// Whether `provider` holds a slot-occupying request whose execution
    /// time lies strictly within `slot` of `at`.
    async fn has_conflict(
        &self,
        provider: &ProviderId,
        at: DateTime<Utc>,
        slot: Duration,
    ) -> Result<bool>;

    /// Conditionally applies `patch`.
    async fn update_if(
        &self,
        id: &JobId,
        guard: &JobGuard,
        patch: &JobPatch,
    ) -> Result<CasResult<JobRequest>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewJobRequest;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_provider_guard_matching() {
        let p = Provider::new("P1").online_since(now()).with_penalties(2, 1);
        assert!(ProviderGuard::any().matches(&p));
        assert!(ProviderGuard::any().reachable(true).matches(&p));
        assert!(!ProviderGuard::any().reachable(false).matches(&p));
        assert!(ProviderGuard::any().penalties_of(&p).matches(&p));

        let moved_on = p.clone().with_penalties(0, 2);
        assert!(!ProviderGuard::any().penalties_of(&p).matches(&moved_on));
    }

    #[test]
    fn test_availability_guard_tracks_snapshot() {
        let p = Provider::new("P1")
            .online_since(now() - Duration::hours(1))
            .with_last_activity(now() - Duration::minutes(30));
        let guard = ProviderGuard::any().availability_of(&p).activity_of(&p);
        assert!(guard.matches(&p));

        let heartbeat = p.clone().with_last_activity(now());
        assert!(!guard.matches(&heartbeat));
        assert!(ProviderGuard::any().availability_of(&p).matches(&heartbeat));

        let rejoined = p.clone().online_since(now());
        assert!(!ProviderGuard::any().availability_of(&p).matches(&rejoined));
    }

    #[test]
    fn test_availability_patch_keeps_since_when_already_online() {
        let earlier = now() - Duration::minutes(30);
        let online = Provider::new("P1").online_since(earlier);
        let mut p = online.clone();
        ProviderPatch::availability(true, &online, now()).apply(&mut p);
        assert_eq!(p.reachable_since, Some(earlier));

        ProviderPatch::availability(false, &online, now()).apply(&mut p);
        assert!(!p.reachable);
        assert!(p.reachable_since.is_none());

        let offline = Provider::new("P2");
        let mut q = offline.clone();
        ProviderPatch::availability(true, &offline, now()).apply(&mut q);
        assert_eq!(q.reachable_since, Some(now()));
    }

    #[test]
    fn test_job_guard_matching() {
        let job = JobRequest::immediate(
            NewJobRequest::new("C1", "plumbing"),
            "P1".into(),
            now(),
            Duration::minutes(15),
        );
        assert!(JobGuard::pending_with(&"P1".into()).matches(&job));
        assert!(!JobGuard::pending_with(&"P2".into()).matches(&job));
        assert!(!JobGuard::status(JobStatus::Accepted).matches(&job));
        assert!(JobGuard::pending_with(&"P1".into())
            .after_fallbacks(0)
            .matches(&job));
        assert!(!JobGuard::pending_with(&"P1".into())
            .after_fallbacks(1)
            .matches(&job));
    }

    #[test]
    fn test_cas_result_helpers() {
        assert!(CasResult::Success(1).is_success());
        assert_eq!(CasResult::Success(1).into_record(), Some(1));
        assert_eq!(CasResult::<i32>::Mismatch.into_record(), None);
        assert!(!CasResult::<i32>::NotFound.is_success());
    }
}
