//! Tokio runtime for tickers.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::Ticker;
use crate::error::Result;

/// Runs a ticker until `shutdown` fires.
///
/// Cycles that fall behind are skipped, not bunched. A failed cycle is
/// logged; after `max_consecutive_failures` failures in a row the last
/// error is returned.
pub async fn run_ticker(
    ticker: Arc<dyn Ticker>,
    shutdown: CancellationToken,
    max_consecutive_failures: u32,
) -> Result<()> {
    let span = info_span!("ticker", name = ticker.name());
    async move {
        info!(cadence = ?ticker.cadence(), "ticker started");
        let mut clock = interval(ticker.cadence());
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("ticker stopped");
                    return Ok(());
                }
                _ = clock.tick() => {}
            }

            match ticker.tick(Utc::now()).await {
                Ok(report) => {
                    failures = 0;
                    if report.changed > 0 || report.failed > 0 {
                        info!(
                            scanned = report.scanned,
                            changed = report.changed,
                            skipped = report.skipped,
                            failed = report.failed,
                            "cycle complete"
                        );
                    } else {
                        debug!(scanned = report.scanned, "cycle complete");
                    }
                }
                Err(err) => {
                    failures += 1;
                    error!(error = %err, failures, "cycle failed");
                    if failures >= max_consecutive_failures.max(1) {
                        return Err(err);
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Running tickers and their shared shutdown signal.
#[derive(Debug)]
pub struct TickerSet {
    shutdown: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl TickerSet {
    /// The token that stops every ticker in the set.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of running tickers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stops every ticker and waits for them.
    ///
    /// Returns the first ticker error, if any ticker gave up before shutdown.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        let mut first_err = None;
        for (name, handle) in self.handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(ticker = name, error = %err, "ticker exited with error");
                    first_err.get_or_insert(err);
                }
                Err(join_err) => error!(ticker = name, error = %join_err, "ticker task panicked"),
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Spawns each ticker on the current tokio runtime.
pub fn spawn_tickers(
    tickers: Vec<Arc<dyn Ticker>>,
    shutdown: CancellationToken,
    max_consecutive_failures: u32,
) -> TickerSet {
    let handles = tickers
        .into_iter()
        .map(|ticker| {
            let name = ticker.name();
            let token = shutdown.child_token();
            let handle = tokio::spawn(run_ticker(ticker, token, max_consecutive_failures));
            (name, handle)
        })
        .collect();
    TickerSet { shutdown, handles }
}
