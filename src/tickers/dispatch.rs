//! Dispatch ticker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{TickReport, Ticker};
use crate::error::Result;
use crate::orchestrator::{DispatchOrchestrator, FallbackOutcome};

/// Expires, reassigns and cleans up job requests.
///
/// Each cycle runs three passes in order: expiry first (so a request past
/// its lifetime is never reassigned), then fallback, then stale scheduled
/// bookings.
#[derive(Debug)]
pub struct DispatchTicker {
    orchestrator: DispatchOrchestrator,
    cadence: std::time::Duration,
}

impl DispatchTicker {
    /// Creates the ticker.
    pub fn new(orchestrator: DispatchOrchestrator, cadence: std::time::Duration) -> Self {
        Self {
            orchestrator,
            cadence,
        }
    }

    async fn expire_pass(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for job in self.orchestrator.due_for_expiry(now).await? {
            match self.orchestrator.expire(&job, now).await {
                Ok(true) => {
                    report.scanned += 1;
                    report.changed += 1;
                }
                Ok(false) => report.skip(),
                Err(err) => report.fail(self.name(), job.id.as_str(), &err),
            }
        }
        Ok(report)
    }

    async fn fallback_pass(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for job in self.orchestrator.due_for_fallback(now).await? {
            match self.orchestrator.fallback(&job, now).await {
                Ok(FallbackOutcome::Reassigned { .. } | FallbackOutcome::Expired) => {
                    report.scanned += 1;
                    report.changed += 1;
                }
                Ok(outcome) => {
                    debug!(job_id = %job.id, ?outcome, "fallback not applied");
                    report.skip();
                }
                Err(err) => report.fail(self.name(), job.id.as_str(), &err),
            }
        }
        Ok(report)
    }

    async fn stale_pass(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for job in self.orchestrator.stale_scheduled(now).await? {
            match self.orchestrator.cancel_unanswered_scheduled(&job, now).await {
                Ok(true) => {
                    report.scanned += 1;
                    report.changed += 1;
                }
                Ok(false) => report.skip(),
                Err(err) => report.fail(self.name(), job.id.as_str(), &err),
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl Ticker for DispatchTicker {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn cadence(&self) -> std::time::Duration {
        self.cadence
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = self.expire_pass(now).await?;
        report.merge(self.fallback_pass(now).await?);
        report.merge(self.stale_pass(now).await?);
        Ok(report)
    }
}
