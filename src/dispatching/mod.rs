//! Candidate selection for immediate job requests.
//!
//! Selection runs in three stages:
//!
//! 1. **Eligibility**: skill, reachability, suspension, deposit, exclusion
//!    set and the request's [`CandidateCriteria`](crate::models::CandidateCriteria).
//! 2. **Geography**: when the criteria carry a client location and a radius,
//!    a [`GeoIndex`] keeps providers within the radius and reports distances.
//! 3. **Ranking**: a [`RuleEngine`] orders the survivors by composable rules,
//!    then a busy check walks the ranked list.
//!
//! # Usage
//!
//! ```
//! use u_dispatch::dispatching::{RuleEngine, TieBreaker};
//! use u_dispatch::dispatching::rules;
//!
//! let engine = RuleEngine::new()
//!     .with_rule(rules::Proximity)
//!     .with_tie_breaker(rules::RecentActivity)
//!     .with_final_tie_breaker(TieBreaker::ById);
//! ```

mod context;
mod engine;
mod geo;
pub mod rules;
mod selector;

pub use context::SelectionContext;
pub use engine::{RuleEngine, TieBreaker};
pub use geo::{GeoIndex, LinearScan};
pub use selector::CandidateSelector;

use crate::models::Provider;
use std::fmt::Debug;

/// Score returned by a ranking rule.
///
/// Lower scores = higher priority (offered first).
pub type RuleScore = f64;

/// A rule that scores a provider for an offer.
///
/// # Score Convention
/// **Lower score = higher priority.** Rules that prefer larger values
/// (rating, recency) return the negated value.
pub trait DispatchingRule: Send + Sync + Debug {
    /// Rule name (e.g., "PROXIMITY").
    fn name(&self) -> &'static str;

    /// Scores a provider in the given selection context.
    fn evaluate(&self, provider: &Provider, context: &SelectionContext) -> RuleScore;

    /// Rule description.
    fn description(&self) -> &'static str {
        self.name()
    }
}
