//! Service provider model.
//!
//! Providers are the professionals that receive offers. Each provider has
//! a skill set, an optional position, an availability flag governed by one
//! of two strategies, penalty counters, and the qualification attributes the
//! candidate selector filters on.
//!
//! # Invariant
//! `reachable == true` only while the provider is not suspended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{ProviderId, WeeklySchedule};

/// Mean Earth radius used for great-circle distances (m).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Which trigger governs a provider's `reachable` flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvailabilityStrategy {
    /// Toggled by the provider.
    #[default]
    Manual,
    /// Flipped at the boundaries of the weekly schedule.
    Scheduled,
}

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude (degrees).
    pub lat: f64,
    /// Longitude (degrees).
    pub lng: f64,
}

impl GeoPoint {
    /// Creates a point from longitude and latitude.
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// A document a provider has on file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// When the document stops being valid. `None` = no expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A document without expiry.
    pub fn permanent() -> Self {
        Self { expires_at: None }
    }

    /// A document valid until `expires_at`.
    pub fn expiring(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(expires_at),
        }
    }

    /// Whether the document is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// A service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Unique provider identifier.
    pub id: ProviderId,
    /// Human-readable name.
    pub name: String,
    /// Skill identifiers the provider offers.
    pub skills: HashSet<String>,
    /// Last known position.
    pub location: Option<GeoPoint>,
    /// Current availability flag.
    pub reachable: bool,
    /// Which trigger governs `reachable`.
    pub strategy: AvailabilityStrategy,
    /// Weekly windows, meaningful under [`AvailabilityStrategy::Scheduled`].
    pub schedule: WeeklySchedule,
    /// Set when `reachable` becomes true, cleared when it becomes false.
    pub reachable_since: Option<DateTime<Utc>>,
    /// Last heartbeat.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Late marks accumulated toward the next strike.
    pub late_marks: u32,
    /// Strikes accumulated toward suspension.
    pub strikes: u32,
    /// End of the current suspension.
    pub suspended_until: Option<DateTime<Utc>>,
    /// When the last penalty was applied.
    pub last_penalized_at: Option<DateTime<Utc>>,
    /// Keys of the most recent penalty events applied, oldest first
    /// (idempotence guard, bounded).
    #[serde(default)]
    pub recent_penalty_keys: Vec<String>,
    /// Average review rating.
    pub rating: f64,
    /// Number of reviews behind `rating`.
    pub review_count: u32,
    /// Primary identity/licence document.
    pub primary_document: Option<Credential>,
    /// Secondary document (e.g. insurance).
    pub secondary_document: Option<Credential>,
    /// Whether the provider asks for a deposit before work.
    pub requires_deposit: bool,
}

impl Provider {
    /// Creates an unreachable, manually-toggled provider.
    pub fn new(id: impl Into<ProviderId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            skills: HashSet::new(),
            location: None,
            reachable: false,
            strategy: AvailabilityStrategy::Manual,
            schedule: WeeklySchedule::new(),
            reachable_since: None,
            last_activity_at: None,
            late_marks: 0,
            strikes: 0,
            suspended_until: None,
            last_penalized_at: None,
            recent_penalty_keys: Vec::new(),
            rating: 0.0,
            review_count: 0,
            primary_document: None,
            secondary_document: None,
            requires_deposit: false,
        }
    }

    /// Sets the provider name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a skill.
    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill.into());
        self
    }

    /// Sets the position.
    pub fn with_location(mut self, point: GeoPoint) -> Self {
        self.location = Some(point);
        self
    }

    /// Marks the provider reachable since `since`.
    pub fn online_since(mut self, since: DateTime<Utc>) -> Self {
        self.reachable = true;
        self.reachable_since = Some(since);
        self
    }

    /// Switches to schedule-driven availability.
    pub fn with_schedule(mut self, schedule: WeeklySchedule) -> Self {
        self.strategy = AvailabilityStrategy::Scheduled;
        self.schedule = schedule;
        self
    }

    /// Sets the last heartbeat.
    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(at);
        self
    }

    /// Sets rating and review count.
    pub fn with_reviews(mut self, rating: f64, review_count: u32) -> Self {
        self.rating = rating;
        self.review_count = review_count;
        self
    }

    /// Sets the primary document.
    pub fn with_primary_document(mut self, credential: Credential) -> Self {
        self.primary_document = Some(credential);
        self
    }

    /// Sets the secondary document.
    pub fn with_secondary_document(mut self, credential: Credential) -> Self {
        self.secondary_document = Some(credential);
        self
    }

    /// Sets whether a deposit is required.
    pub fn with_deposit_required(mut self, required: bool) -> Self {
        self.requires_deposit = required;
        self
    }

    /// Sets the penalty counters.
    pub fn with_penalties(mut self, late_marks: u32, strikes: u32) -> Self {
        self.late_marks = late_marks;
        self.strikes = strikes;
        self
    }

    /// Sets the suspension end.
    pub fn with_suspension(mut self, until: DateTime<Utc>) -> Self {
        self.suspended_until = Some(until);
        self
    }

    /// Whether the provider offers a skill.
    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.contains(skill)
    }

    /// Whether a suspension is in force at `now`.
    pub fn is_suspended_at(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.is_some_and(|until| until > now)
    }

    /// Most recent sign of life: the later of the last heartbeat and the
    /// moment the provider went online.
    pub fn effective_last_activity(&self) -> Option<DateTime<Utc>> {
        match (self.last_activity_at, self.reachable_since) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether the provider is schedule-driven with at least one usable window.
    pub fn follows_schedule(&self) -> bool {
        self.strategy == AvailabilityStrategy::Scheduled && self.schedule.has_valid_windows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_provider_builder() {
        let p = Provider::new("P1")
            .with_name("Kim Plumbing")
            .with_skill("plumbing")
            .with_location(GeoPoint::new(126.97, 37.56))
            .with_reviews(4.8, 120)
            .with_deposit_required(true);

        assert_eq!(p.id.as_str(), "P1");
        assert!(p.has_skill("plumbing"));
        assert!(!p.has_skill("welding"));
        assert!(!p.reachable);
        assert_eq!(p.strategy, AvailabilityStrategy::Manual);
        assert!(p.requires_deposit);
        assert_eq!(p.review_count, 120);
    }

    #[test]
    fn test_suspension_window() {
        let p = Provider::new("P1").with_suspension(now() + Duration::hours(1));
        assert!(p.is_suspended_at(now()));
        assert!(!p.is_suspended_at(now() + Duration::hours(2)));
        assert!(!Provider::new("P2").is_suspended_at(now()));
    }

    #[test]
    fn test_effective_last_activity() {
        let online = now() - Duration::minutes(5);
        let heartbeat = now() - Duration::minutes(20);

        let p = Provider::new("P1").online_since(online).with_last_activity(heartbeat);
        assert_eq!(p.effective_last_activity(), Some(online));

        let p = Provider::new("P1").with_last_activity(heartbeat);
        assert_eq!(p.effective_last_activity(), Some(heartbeat));

        assert_eq!(Provider::new("P1").effective_last_activity(), None);
    }

    #[test]
    fn test_credential_validity() {
        assert!(Credential::permanent().is_valid_at(now()));
        assert!(Credential::expiring(now() + Duration::days(1)).is_valid_at(now()));
        assert!(!Credential::expiring(now()).is_valid_at(now()));
    }

    #[test]
    fn test_haversine_distance() {
        // One degree of latitude is roughly 111.2 km.
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        let d = a.distance_m(&b);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
        assert!(a.distance_m(&a).abs() < 1e-9);
    }

    #[test]
    fn test_follows_schedule() {
        let p = Provider::new("P1").with_schedule(WeeklySchedule::every_day("09:00", "18:00"));
        assert!(p.follows_schedule());
        let p = Provider::new("P1").with_schedule(WeeklySchedule::new());
        assert!(!p.follows_schedule());
    }
}
