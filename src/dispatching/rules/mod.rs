//! Built-in ranking rules.
//!
//! # Categories
//!
//! - **Geographic**: PROXIMITY
//! - **Liveness**: RECENT_ACTIVITY
//! - **Reputation**: RATING, REVIEWS
//!
//! # Score Convention
//! All rules return lower scores for providers that should be offered first.

use super::{DispatchingRule, RuleScore, SelectionContext};
use crate::models::Provider;

/// Nearest provider first.
///
/// Providers without a known distance rank after every measured one.
#[derive(Debug, Clone, Copy)]
pub struct Proximity;

impl DispatchingRule for Proximity {
    fn name(&self) -> &'static str {
        "PROXIMITY"
    }

    fn evaluate(&self, provider: &Provider, context: &SelectionContext) -> RuleScore {
        context.distance_of(&provider.id).unwrap_or(f64::MAX)
    }

    fn description(&self) -> &'static str {
        "Ascending distance from the client"
    }
}

/// Most recently active provider first.
///
/// Uses the later of the last heartbeat and the moment the provider went
/// online, scored as milliseconds idle before the selection instant.
/// Providers with no sign of life rank last.
#[derive(Debug, Clone, Copy)]
pub struct RecentActivity;

impl DispatchingRule for RecentActivity {
    fn name(&self) -> &'static str {
        "RECENT_ACTIVITY"
    }

    fn evaluate(&self, provider: &Provider, context: &SelectionContext) -> RuleScore {
        provider
            .effective_last_activity()
            .map_or(f64::MAX, |at| (context.now - at).num_milliseconds() as f64)
    }

    fn description(&self) -> &'static str {
        "Most recent activity"
    }
}

/// Highest rating first.
#[derive(Debug, Clone, Copy)]
pub struct Rating;

impl DispatchingRule for Rating {
    fn name(&self) -> &'static str {
        "RATING"
    }

    fn evaluate(&self, provider: &Provider, _context: &SelectionContext) -> RuleScore {
        -provider.rating
    }

    fn description(&self) -> &'static str {
        "Descending average rating"
    }
}

/// Most reviewed first.
#[derive(Debug, Clone, Copy)]
pub struct ReviewCount;

impl DispatchingRule for ReviewCount {
    fn name(&self) -> &'static str {
        "REVIEWS"
    }

    fn evaluate(&self, provider: &Provider, _context: &SelectionContext) -> RuleScore {
        -(provider.review_count as f64)
    }

    fn description(&self) -> &'static str {
        "Descending review count"
    }
}
