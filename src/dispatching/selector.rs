//! Candidate selector.
//!
//! Filtering and ranking are pure; only the busy check touches the job
//! store. The busy check walks the ranked list and gives up after
//! `max_attempts` busy candidates. A candidate is busy when it holds a
//! pending or accepted request executing within `busy_slot` of the new one.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{GeoIndex, LinearScan, RuleEngine, SelectionContext};
use crate::error::Result;
use crate::models::{CandidateCriteria, Provider, ProviderId};
use crate::store::{JobStore, ProviderStore};

/// Default number of busy candidates tolerated before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// Default half-width (seconds) of the execution slot used by the busy check.
pub const DEFAULT_BUSY_SLOT_SECS: i64 = 3_600;

/// Picks the next provider to offer a request to.
#[derive(Clone)]
pub struct CandidateSelector {
    providers: Arc<dyn ProviderStore>,
    jobs: Arc<dyn JobStore>,
    geo: Arc<dyn GeoIndex>,
    ranking: RuleEngine,
    max_attempts: usize,
    busy_slot: Duration,
}

impl CandidateSelector {
    /// Creates a selector with linear-scan geography and the standard ranking.
    pub fn new(providers: Arc<dyn ProviderStore>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            providers,
            jobs,
            geo: Arc::new(LinearScan),
            ranking: RuleEngine::standard(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            busy_slot: Duration::seconds(DEFAULT_BUSY_SLOT_SECS),
        }
    }

    /// Replaces the geo capability.
    pub fn with_geo_index(mut self, geo: Arc<dyn GeoIndex>) -> Self {
        self.geo = geo;
        self
    }

    /// Replaces the ranking rules.
    pub fn with_ranking(mut self, ranking: RuleEngine) -> Self {
        self.ranking = ranking;
        self
    }

    /// Sets how many busy candidates are skipped before giving up.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets how close two execution times must be to collide.
    pub fn with_busy_slot(mut self, busy_slot: Duration) -> Self {
        self.busy_slot = busy_slot;
        self
    }

    /// Whether a provider may receive an offer for `skill`.
    pub fn is_eligible(
        provider: &Provider,
        skill: &str,
        excluded: &HashSet<ProviderId>,
        criteria: &CandidateCriteria,
        now: DateTime<Utc>,
    ) -> bool {
        provider.has_skill(skill)
            && provider.reachable
            && !provider.is_suspended_at(now)
            && !provider.requires_deposit
            && !excluded.contains(&provider.id)
            && criteria.admits(provider, now)
    }

    /// Orders eligible providers, best first.
    ///
    /// With a geographic constraint, providers outside the radius (or without
    /// a location) are dropped and distance leads the ranking.
    pub fn rank(
        &self,
        eligible: Vec<Provider>,
        criteria: &CandidateCriteria,
        now: DateTime<Utc>,
    ) -> Vec<Provider> {
        let mut context = SelectionContext::at(now);
        let pool = match criteria.geo_constraint() {
            Some((origin, radius)) => {
                let hits = self.geo.nearest_within_radius(origin, radius, &eligible);
                let mut slots: Vec<Option<Provider>> = eligible.into_iter().map(Some).collect();
                hits.into_iter()
                    .filter_map(|(i, distance)| {
                        let provider = slots.get_mut(i)?.take()?;
                        context.distances.insert(provider.id.clone(), distance);
                        Some(provider)
                    })
                    .collect()
            }
            None => eligible,
        };

        let mut slots: Vec<Option<Provider>> = Vec::with_capacity(pool.len());
        let order = self.ranking.sort_indices(&pool, &context);
        slots.extend(pool.into_iter().map(Some));
        order
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect()
    }

    /// Selects the best non-busy candidate for a request at `at`.
    ///
    /// Returns `Ok(None)` when nobody is eligible or every tried candidate
    /// is busy.
    pub async fn select(
        &self,
        skill: &str,
        at: DateTime<Utc>,
        excluded: &HashSet<ProviderId>,
        criteria: &CandidateCriteria,
        now: DateTime<Utc>,
    ) -> Result<Option<Provider>> {
        let eligible: Vec<Provider> = self
            .providers
            .find_by_skill(skill)
            .await?
            .into_iter()
            .filter(|p| Self::is_eligible(p, skill, excluded, criteria, now))
            .collect();

        let ranked = self.rank(eligible, criteria, now);
        for candidate in ranked.into_iter().take(self.max_attempts) {
            if self.jobs.has_conflict(&candidate.id, at, self.busy_slot).await? {
                debug!(provider_id = %candidate.id, %at, "candidate busy, trying next");
                continue;
            }
            return Ok(Some(candidate));
        }
        Ok(None)
    }
}

impl std::fmt::Debug for CandidateSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSelector")
            .field("geo", &self.geo)
            .field("ranking", &self.ranking)
            .field("max_attempts", &self.max_attempts)
            .field("busy_slot", &self.busy_slot)
            .finish()
    }
}
