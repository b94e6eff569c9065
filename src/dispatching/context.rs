//! Selection context for ranking rule evaluation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::ProviderId;

/// Per-selection state passed to ranking rules.
///
/// Distances are only present when the request carries a geographic
/// constraint; rules must treat a missing distance as "unknown".
#[derive(Debug, Clone)]
pub struct SelectionContext {
    /// Evaluation instant.
    pub now: DateTime<Utc>,
    /// Distance from the client per provider (m).
    pub distances: HashMap<ProviderId, f64>,
}

impl SelectionContext {
    /// Creates a context at the given instant.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            distances: HashMap::new(),
        }
    }

    /// Records a provider's distance from the client.
    pub fn with_distance(mut self, provider: impl Into<ProviderId>, meters: f64) -> Self {
        self.distances.insert(provider.into(), meters);
        self
    }

    /// Distance of a provider from the client, if known.
    pub fn distance_of(&self, provider: &ProviderId) -> Option<f64> {
        self.distances.get(provider).copied()
    }
}
