//! Candidate qualification criteria.
//!
//! Criteria travel with a job request so that every fallback round filters
//! providers exactly like the first offer did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Credential, GeoPoint, Provider};

/// Requirements a provider must meet to receive an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCriteria {
    /// Require a valid primary document (default: true).
    pub require_primary_document: bool,
    /// Require a valid secondary document (default: false).
    pub require_secondary_document: bool,
    /// Minimum average rating.
    pub min_rating: Option<f64>,
    /// Minimum number of reviews.
    pub min_reviews: Option<u32>,
    /// Maximum distance from the client (m).
    pub max_distance_m: Option<f64>,
    /// Where the job takes place.
    pub client_location: Option<GeoPoint>,
}

impl Default for CandidateCriteria {
    fn default() -> Self {
        Self {
            require_primary_document: true,
            require_secondary_document: false,
            min_rating: None,
            min_reviews: None,
            max_distance_m: None,
            client_location: None,
        }
    }
}

impl CandidateCriteria {
    /// Creates the default criteria.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the primary document is required.
    pub fn with_primary_document(mut self, required: bool) -> Self {
        self.require_primary_document = required;
        self
    }

    /// Sets whether the secondary document is required.
    pub fn with_secondary_document(mut self, required: bool) -> Self {
        self.require_secondary_document = required;
        self
    }

    /// Sets the rating floor.
    pub fn with_min_rating(mut self, rating: f64) -> Self {
        self.min_rating = Some(rating);
        self
    }

    /// Sets the review-count floor.
    pub fn with_min_reviews(mut self, reviews: u32) -> Self {
        self.min_reviews = Some(reviews);
        self
    }

    /// Restricts candidates to a radius around the client.
    pub fn within(mut self, client_location: GeoPoint, max_distance_m: f64) -> Self {
        self.client_location = Some(client_location);
        self.max_distance_m = Some(max_distance_m);
        self
    }

    /// The geographic constraint, when both halves are present.
    pub fn geo_constraint(&self) -> Option<(GeoPoint, f64)> {
        self.client_location.zip(self.max_distance_m)
    }

    /// Whether the provider's documents and reviews satisfy the criteria.
    ///
    /// Skill, reachability, suspension and exclusion are checked by the
    /// selector; this covers only the qualification attributes.
    pub fn admits(&self, provider: &Provider, now: DateTime<Utc>) -> bool {
        document_ok(&provider.primary_document, self.require_primary_document, now)
            && document_ok(&provider.secondary_document, self.require_secondary_document, now)
            && self.min_rating.map_or(true, |min| provider.rating >= min)
            && self
                .min_reviews
                .map_or(true, |min| provider.review_count >= min)
    }
}

fn document_ok(document: &Option<Credential>, required: bool, now: DateTime<Utc>) -> bool {
    !required || document.as_ref().is_some_and(|c| c.is_valid_at(now))
}
