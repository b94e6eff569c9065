//! Periodic tasks that drive time-based transitions.
//!
//! | Ticker | Default cadence | Acts on |
//! |--------|-----------------|---------|
//! | [`ScheduleTicker`] | 60 s | schedule-driven providers at window boundaries |
//! | [`InactivityTicker`] | 10 s | online providers without recent heartbeats |
//! | [`DispatchTicker`] | 60 s | expired, timed-out and stale job requests |
//!
//! Tickers share no state. Each cycle re-reads the store and writes
//! conditionally, so cycles of different tickers commute.

mod dispatch;
mod inactivity;
mod runner;
mod schedule;

pub use dispatch::DispatchTicker;
pub use inactivity::InactivityTicker;
pub use runner::{run_ticker, spawn_tickers, TickerSet};
pub use schedule::ScheduleTicker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::availability::Transition;
use crate::error::{DispatchError, Result};

/// Counters for one ticker cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Records examined.
    pub scanned: usize,
    /// Records transitioned.
    pub changed: usize,
    /// Records left alone (not due, raced, or vanished).
    pub skipped: usize,
    /// Records whose processing failed.
    pub failed: usize,
}

impl TickReport {
    /// Counts one examined record by its transition.
    pub fn record(&mut self, transition: Transition) {
        self.scanned += 1;
        match transition {
            Transition::Changed => self.changed += 1,
            Transition::Unchanged | Transition::Raced | Transition::Gone => self.skipped += 1,
        }
    }

    /// Counts one examined record that was not acted on.
    pub fn skip(&mut self) {
        self.scanned += 1;
        self.skipped += 1;
    }

    /// Counts one record whose processing failed, and logs it.
    ///
    /// Benign failures (record gone, lost race, nobody to offer to) log at
    /// debug level; anything else warns.
    pub fn fail(&mut self, ticker: &str, record: &str, err: &DispatchError) {
        self.scanned += 1;
        self.failed += 1;
        if err.is_benign() {
            debug!(ticker, record, error = %err, "record skipped");
        } else {
            warn!(ticker, record, error = %err, "record processing failed");
        }
    }

    /// Adds another report's counters.
    pub fn merge(&mut self, other: TickReport) {
        self.scanned += other.scanned;
        self.changed += other.changed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// A periodic task.
#[async_trait]
pub trait Ticker: Send + Sync {
    /// Name used in logs and spans.
    fn name(&self) -> &'static str;

    /// Time between cycles.
    fn cadence(&self) -> std::time::Duration;

    /// Runs one cycle at `now`.
    ///
    /// Per-record failures are counted in the report. An `Err` means the
    /// scan itself could not run.
    async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport>;
}
