//! In-memory store implementations.
//!
//! Thread-safe `RwLock` maps implementing [`ProviderStore`] and [`JobStore`]
//! with the same conditional-update semantics a database backend must offer.
//!
//! ## Limitations
//!
//! - No durability; state is lost when the process exits.
//! - Single-process only.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{CasResult, JobGuard, JobPatch, JobStore, ProviderGuard, ProviderPatch, ProviderStore};
use crate::error::{DispatchError, Result};
use crate::models::{AvailabilityStrategy, JobId, JobRequest, JobStatus, Provider, ProviderId};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> DispatchError {
    DispatchError::storage("lock poisoned")
}

/// In-memory provider store.
#[derive(Debug, Default)]
pub struct InMemoryProviderStore {
    providers: RwLock<HashMap<ProviderId, Provider>>,
}

impl InMemoryProviderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with providers.
    pub fn with_providers(providers: impl IntoIterator<Item = Provider>) -> Self {
        let map = providers.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            providers: RwLock::new(map),
        }
    }

    /// Number of stored providers.
    pub fn len(&self) -> Result<usize> {
        Ok(self.providers.read().map_err(poison_err)?.len())
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn filtered(&self, pred: impl Fn(&Provider) -> bool) -> Result<Vec<Provider>> {
        let providers = self.providers.read().map_err(poison_err)?;
        let mut found: Vec<Provider> = providers.values().filter(|p| pred(p)).cloned().collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[async_trait]
impl ProviderStore for InMemoryProviderStore {
    async fn get(&self, id: &ProviderId) -> Result<Option<Provider>> {
        Ok(self.providers.read().map_err(poison_err)?.get(id).cloned())
    }

    async fn save(&self, provider: &Provider) -> Result<()> {
        self.providers
            .write()
            .map_err(poison_err)?
            .insert(provider.id.clone(), provider.clone());
        Ok(())
    }

    async fn find_by_skill(&self, skill: &str) -> Result<Vec<Provider>> {
        self.filtered(|p| p.has_skill(skill))
    }

    async fn find_by_strategy(&self, strategy: AvailabilityStrategy) -> Result<Vec<Provider>> {
        self.filtered(|p| p.strategy == strategy)
    }

    async fn find_online(&self) -> Result<Vec<Provider>> {
        self.filtered(|p| p.reachable && p.reachable_since.is_some())
    }

    async fn update_if(
        &self,
        id: &ProviderId,
        guard: &ProviderGuard,
        patch: &ProviderPatch,
    ) -> Result<CasResult<Provider>> {
        let mut providers = self.providers.write().map_err(poison_err)?;
        let Some(provider) = providers.get_mut(id) else {
            return Ok(CasResult::NotFound);
        };
        if !guard.matches(provider) {
            return Ok(CasResult::Mismatch);
        }
        patch.apply(provider);
        Ok(CasResult::Success(provider.clone()))
    }
}

/// In-memory job request store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRequest>>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored requests.
    pub fn len(&self) -> Result<usize> {
        Ok(self.jobs.read().map_err(poison_err)?.len())
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn filtered(&self, pred: impl Fn(&JobRequest) -> bool) -> Result<Vec<JobRequest>> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        let mut found: Vec<JobRequest> = jobs.values().filter(|j| pred(j)).cloned().collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &JobRequest) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        if jobs.contains_key(&job.id) {
            return Err(DispatchError::PreconditionFailed(format!(
                "job request {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRequest>> {
        Ok(self.jobs.read().map_err(poison_err)?.get(id).cloned())
    }

    async fn find_due_for_fallback(
        &self,
        now: DateTime<Utc>,
        fallback_timeout: Duration,
    ) -> Result<Vec<JobRequest>> {
        self.filtered(|j| {
            j.is_pending()
                && j.is_immediate
                && j.offer
                    .as_ref()
                    .is_some_and(|o| o.fallback_due(now, fallback_timeout))
        })
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobRequest>> {
        self.filtered(|j| {
            j.is_pending()
                && j.is_immediate
                && j.offer
                    .as_ref()
                    .is_some_and(|o| o.is_expired(now) && o.expired_at.is_none())
        })
    }

    async fn find_stale_scheduled(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<JobRequest>> {
        self.filtered(|j| j.is_pending() && !j.is_immediate && j.created_at <= created_before)
    }

    async fn has_conflict(
        &self,
        provider: &ProviderId,
        at: DateTime<Utc>,
        slot: Duration,
    ) -> Result<bool> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        Ok(jobs.values().any(|j| {
            &j.current_provider == provider
                && j.status.occupies_slot()
                && (j.scheduled_at - at).abs() < slot
        }))
    }

    async fn update_if(
        &self,
        id: &JobId,
        guard: &JobGuard,
        patch: &JobPatch,
    ) -> Result<CasResult<JobRequest>> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(CasResult::NotFound);
        };
        if !guard.matches(job) {
            return Ok(CasResult::Mismatch);
        }
        patch.apply(job);
        Ok(CasResult::Success(job.clone()))
    }
}

impl InMemoryJobStore {
    /// Requests currently in a status (test and diagnostics helper).
    pub fn with_status(&self, status: JobStatus) -> Result<Vec<JobRequest>> {
        self.filtered(|j| j.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewJobRequest;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn immediate(id: &str, provider: &str) -> JobRequest {
        JobRequest::immediate(
            NewJobRequest::new("C1", "plumbing"),
            provider.into(),
            t0(),
            Duration::minutes(15),
        )
        .with_id(id)
    }

    #[tokio::test]
    async fn test_provider_cas() {
        let store = InMemoryProviderStore::with_providers([Provider::new("P1")]);
        let patch = ProviderPatch::availability(true, &Provider::new("P1"), t0());

        let res = store
            .update_if(&"P1".into(), &ProviderGuard::any().reachable(true), &patch)
            .await
            .unwrap();
        assert!(!res.is_success());

        let res = store
            .update_if(&"P1".into(), &ProviderGuard::any().reachable(false), &patch)
            .await
            .unwrap();
        assert!(res.into_record().unwrap().reachable);

        let res = store
            .update_if(&"nobody".into(), &ProviderGuard::any(), &patch)
            .await
            .unwrap();
        assert!(matches!(res, CasResult::NotFound));
    }

    #[tokio::test]
    async fn test_provider_queries() {
        let store = InMemoryProviderStore::with_providers([
            Provider::new("P1").with_skill("plumbing").online_since(t0()),
            Provider::new("P2")
                .with_skill("cleaning")
                .with_schedule(crate::models::WeeklySchedule::every_day("09:00", "18:00")),
        ]);

        let plumbers = store.find_by_skill("plumbing").await.unwrap();
        assert_eq!(plumbers.len(), 1);
        let scheduled = store
            .find_by_strategy(AvailabilityStrategy::Scheduled)
            .await
            .unwrap();
        assert_eq!(scheduled[0].id.as_str(), "P2");
        let online = store.find_online().await.unwrap();
        assert_eq!(online[0].id.as_str(), "P1");
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_job_timing_queries() {
        let store = InMemoryJobStore::new();
        store.create(&immediate("J1", "P1")).await.unwrap();

        let timeout = Duration::minutes(5);
        assert!(store.find_due_for_fallback(t0(), timeout).await.unwrap().is_empty());
        let due = store
            .find_due_for_fallback(t0() + Duration::minutes(6), timeout)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);

        let later = t0() + Duration::minutes(15);
        assert!(store.find_due_for_fallback(later, timeout).await.unwrap().is_empty());
        assert_eq!(store.find_expired(later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemoryJobStore::new();
        store.create(&immediate("J1", "P1")).await.unwrap();
        assert!(store.create(&immediate("J1", "P1")).await.is_err());
    }

    #[tokio::test]
    async fn test_conflict_detection() {
        let store = InMemoryJobStore::new();
        store.create(&immediate("J1", "P1")).await.unwrap();

        let slot = Duration::hours(1);
        assert!(store.has_conflict(&"P1".into(), t0(), slot).await.unwrap());
        assert!(!store.has_conflict(&"P2".into(), t0(), slot).await.unwrap());
        assert!(store
            .has_conflict(&"P1".into(), t0() + Duration::seconds(30), slot)
            .await
            .unwrap());
        assert!(store
            .has_conflict(&"P1".into(), t0() - Duration::minutes(59), slot)
            .await
            .unwrap());
        assert!(!store
            .has_conflict(&"P1".into(), t0() + Duration::hours(1), slot)
            .await
            .unwrap());

        let canceled = JobPatch {
            status: Some(JobStatus::Canceled),
            ..JobPatch::default()
        };
        store
            .update_if(&"J1".into(), &JobGuard::status(JobStatus::Pending), &canceled)
            .await
            .unwrap();
        assert!(!store.has_conflict(&"P1".into(), t0(), slot).await.unwrap());
        assert_eq!(store.with_status(JobStatus::Canceled).unwrap().len(), 1);
    }
}
