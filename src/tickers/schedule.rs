//! Scheduled-availability ticker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{TickReport, Ticker};
use crate::availability::AvailabilityService;
use crate::error::Result;
use crate::models::{AvailabilityStrategy, Provider};
use crate::store::ProviderStore;

/// Applies schedule verdicts at window boundaries.
///
/// With catch-up enabled, every boundary minute between the previous cycle
/// and this one counts, so a paused process still applies a boundary it
/// slept through. The first cycle after start has no previous cycle and
/// evaluates every schedule unconditionally. Without catch-up only the
/// current minute counts.
pub struct ScheduleTicker {
    providers: Arc<dyn ProviderStore>,
    availability: AvailabilityService,
    cadence: std::time::Duration,
    catch_up: bool,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl ScheduleTicker {
    /// Creates the ticker.
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        availability: AvailabilityService,
        cadence: std::time::Duration,
        catch_up: bool,
    ) -> Self {
        Self {
            providers,
            availability,
            cadence,
            catch_up,
            last_tick: Mutex::new(None),
        }
    }

    fn at_boundary(&self, provider: &Provider, since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let tz = self.availability.time_zone();
        match (self.catch_up, since) {
            (true, None) => true,
            (true, Some(since)) if since < now => provider.schedule.boundary_crossed(since, now, tz),
            _ => provider.schedule.is_boundary_at(now, tz),
        }
    }
}

#[async_trait]
impl Ticker for ScheduleTicker {
    fn name(&self) -> &'static str {
        "schedule"
    }

    fn cadence(&self) -> std::time::Duration {
        self.cadence
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut last_tick = self.last_tick.lock().await;
        let providers = self
            .providers
            .find_by_strategy(AvailabilityStrategy::Scheduled)
            .await?;
        let since = last_tick.replace(now);
        drop(last_tick);

        let mut report = TickReport::default();
        for provider in providers {
            if !provider.follows_schedule() || !self.at_boundary(&provider, since, now) {
                report.skip();
                continue;
            }
            match self.availability.apply_schedule_boundary(&provider, now).await {
                Ok(transition) => {
                    debug!(provider_id = %provider.id, ?transition, "schedule boundary evaluated");
                    report.record(transition);
                }
                Err(err) => report.fail(self.name(), provider.id.as_str(), &err),
            }
        }
        Ok(report)
    }
}

impl std::fmt::Debug for ScheduleTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleTicker")
            .field("cadence", &self.cadence)
            .field("catch_up", &self.catch_up)
            .finish_non_exhaustive()
    }
}
