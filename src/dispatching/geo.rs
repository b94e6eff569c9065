//! Pluggable nearest-within-radius capability.
//!
//! The selector does not care how distances are found: a spatial index, a
//! linear scan, or an external service can all stand behind [`GeoIndex`].

use crate::models::{GeoPoint, Provider};

/// Finds providers within a radius of a point.
pub trait GeoIndex: Send + Sync + std::fmt::Debug {
    /// Returns `(index, distance_m)` for every provider in `candidates`
    /// located within `radius_m` of `origin`, nearest first.
    ///
    /// Providers without a location are never returned.
    fn nearest_within_radius(
        &self,
        origin: GeoPoint,
        radius_m: f64,
        candidates: &[Provider],
    ) -> Vec<(usize, f64)>;
}

/// Haversine distance against every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScan;

impl GeoIndex for LinearScan {
    fn nearest_within_radius(
        &self,
        origin: GeoPoint,
        radius_m: f64,
        candidates: &[Provider],
    ) -> Vec<(usize, f64)> {
        let mut hits: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.location.map(|loc| (i, origin.distance_m(&loc))))
            .filter(|&(_, d)| d <= radius_m)
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }
}
