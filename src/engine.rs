//! Engine assembly.
//!
//! [`DispatchEngine`] wires stores, sinks and configuration into the
//! availability service, the orchestrator and the three tickers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use u_dispatch::config::DispatchConfig;
//! use u_dispatch::engine::DispatchEngine;
//! use u_dispatch::notify::{Notifier, RecordingSink};
//! use u_dispatch::store::memory::{InMemoryJobStore, InMemoryProviderStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> u_dispatch::error::Result<()> {
//! let engine = DispatchEngine::new(
//!     DispatchConfig::load(None)?,
//!     Arc::new(InMemoryProviderStore::new()),
//!     Arc::new(InMemoryJobStore::new()),
//!     Notifier::uniform(Arc::new(RecordingSink::new())),
//! )?;
//! let tickers = engine.spawn(CancellationToken::new());
//! // ... serve requests through engine.orchestrator() / engine.availability() ...
//! tickers.shutdown().await
//! # }
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::availability::AvailabilityService;
use crate::config::DispatchConfig;
use crate::dispatching::{CandidateSelector, GeoIndex, LinearScan, RuleEngine};
use crate::error::Result;
use crate::notify::Notifier;
use crate::orchestrator::DispatchOrchestrator;
use crate::penalty::PenaltyLedger;
use crate::store::{JobStore, ProviderStore};
use crate::tickers::{
    spawn_tickers, DispatchTicker, InactivityTicker, ScheduleTicker, Ticker, TickerSet,
};

/// The assembled dispatch engine.
#[derive(Clone)]
pub struct DispatchEngine {
    config: DispatchConfig,
    providers: Arc<dyn ProviderStore>,
    jobs: Arc<dyn JobStore>,
    notifier: Notifier,
    availability: AvailabilityService,
    orchestrator: DispatchOrchestrator,
}

impl DispatchEngine {
    /// Assembles an engine with linear-scan geography and standard ranking.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        config: DispatchConfig,
        providers: Arc<dyn ProviderStore>,
        jobs: Arc<dyn JobStore>,
        notifier: Notifier,
    ) -> Result<Self> {
        config.validate()?;
        let availability =
            AvailabilityService::new(providers.clone(), notifier.clone(), config.time_zone);
        let orchestrator = Self::orchestrator_for(
            &config,
            &providers,
            &jobs,
            &notifier,
            &availability,
            Arc::new(LinearScan),
            RuleEngine::standard(),
        );
        Ok(Self {
            config,
            providers,
            jobs,
            notifier,
            availability,
            orchestrator,
        })
    }

    /// Replaces the geo capability and ranking rules of the selector.
    pub fn with_selection(mut self, geo: Arc<dyn GeoIndex>, ranking: RuleEngine) -> Self {
        self.orchestrator = Self::orchestrator_for(
            &self.config,
            &self.providers,
            &self.jobs,
            &self.notifier,
            &self.availability,
            geo,
            ranking,
        );
        self
    }

    fn orchestrator_for(
        config: &DispatchConfig,
        providers: &Arc<dyn ProviderStore>,
        jobs: &Arc<dyn JobStore>,
        notifier: &Notifier,
        availability: &AvailabilityService,
        geo: Arc<dyn GeoIndex>,
        ranking: RuleEngine,
    ) -> DispatchOrchestrator {
        let selector = CandidateSelector::new(providers.clone(), jobs.clone())
            .with_geo_index(geo)
            .with_ranking(ranking)
            .with_max_attempts(config.max_selection_attempts)
            .with_busy_slot(config.busy_slot());
        let penalties = PenaltyLedger::new(
            providers.clone(),
            availability.clone(),
            notifier.clone(),
            config.penalty_policy(),
        );
        DispatchOrchestrator::new(
            jobs.clone(),
            selector,
            penalties,
            notifier.clone(),
            config.offer_timing(),
        )
    }

    /// Configuration in use.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Provider availability operations.
    pub fn availability(&self) -> &AvailabilityService {
        &self.availability
    }

    /// Job request operations.
    pub fn orchestrator(&self) -> &DispatchOrchestrator {
        &self.orchestrator
    }

    /// Builds the schedule, inactivity and dispatch tickers.
    pub fn tickers(&self) -> Vec<Arc<dyn Ticker>> {
        vec![
            Arc::new(ScheduleTicker::new(
                self.providers.clone(),
                self.availability.clone(),
                self.config.schedule_tick(),
                self.config.schedule_catch_up,
            )),
            Arc::new(InactivityTicker::new(
                self.providers.clone(),
                self.availability.clone(),
                self.config.inactivity_threshold(),
                self.config.inactivity_tick(),
            )),
            Arc::new(DispatchTicker::new(
                self.orchestrator.clone(),
                self.config.dispatch_tick(),
            )),
        ]
    }

    /// Starts all tickers on the current tokio runtime.
    pub fn spawn(&self, shutdown: CancellationToken) -> TickerSet {
        info!(time_zone = %self.config.time_zone, "starting dispatch tickers");
        spawn_tickers(
            self.tickers(),
            shutdown,
            self.config.max_consecutive_scan_failures,
        )
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::notify::RecordingSink;
    use crate::store::memory::{InMemoryJobStore, InMemoryProviderStore};

    fn parts() -> (Arc<InMemoryProviderStore>, Arc<InMemoryJobStore>, Notifier) {
        (
            Arc::new(InMemoryProviderStore::new()),
            Arc::new(InMemoryJobStore::new()),
            Notifier::uniform(Arc::new(RecordingSink::new())),
        )
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (providers, jobs, notifier) = parts();
        let config = DispatchConfig {
            dispatch_tick_secs: 0,
            ..DispatchConfig::default()
        };
        let err = DispatchEngine::new(config, providers, jobs, notifier).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn test_tickers_follow_config() {
        let (providers, jobs, notifier) = parts();
        let config = DispatchConfig {
            inactivity_tick_secs: 5,
            ..DispatchConfig::default()
        };
        let engine = DispatchEngine::new(config, providers, jobs, notifier).unwrap();
        let tickers = engine.tickers();

        let names: Vec<&str> = tickers.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["schedule", "inactivity", "dispatch"]);
        assert_eq!(tickers[1].cadence(), std::time::Duration::from_secs(5));
        assert_eq!(
            engine.orchestrator().timing().fallback_timeout,
            chrono::Duration::minutes(5)
        );
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let (providers, jobs, notifier) = parts();
        let engine = DispatchEngine::new(DispatchConfig::default(), providers, jobs, notifier)
            .unwrap()
            .with_selection(Arc::new(LinearScan), RuleEngine::standard());
        let set = engine.spawn(CancellationToken::new());
        assert_eq!(set.len(), 3);
        set.shutdown().await.unwrap();
    }
}
