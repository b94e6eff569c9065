//! Inactivity ticker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{TickReport, Ticker};
use crate::availability::AvailabilityService;
use crate::error::Result;
use crate::store::ProviderStore;

/// Takes providers offline when their heartbeats stop.
pub struct InactivityTicker {
    providers: Arc<dyn ProviderStore>,
    availability: AvailabilityService,
    threshold: Duration,
    cadence: std::time::Duration,
}

impl InactivityTicker {
    /// Creates the ticker.
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        availability: AvailabilityService,
        threshold: Duration,
        cadence: std::time::Duration,
    ) -> Self {
        Self {
            providers,
            availability,
            threshold,
            cadence,
        }
    }
}

#[async_trait]
impl Ticker for InactivityTicker {
    fn name(&self) -> &'static str {
        "inactivity"
    }

    fn cadence(&self) -> std::time::Duration {
        self.cadence
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for provider in self.providers.find_online().await? {
            match self
                .availability
                .expire_inactive(&provider, now, self.threshold)
                .await
            {
                Ok(transition) => report.record(transition),
                Err(err) => report.fail(self.name(), provider.id.as_str(), &err),
            }
        }
        Ok(report)
    }
}

impl std::fmt::Debug for InactivityTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InactivityTicker")
            .field("threshold", &self.threshold)
            .field("cadence", &self.cadence)
            .finish_non_exhaustive()
    }
}
