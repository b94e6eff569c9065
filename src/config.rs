//! Engine configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file, and `DISPATCH_*` environment variables
//! (e.g. `DISPATCH_FALLBACK_TIMEOUT_SECS=120`).
//!
//! # Defaults
//!
//! | Key | Default |
//! |-----|---------|
//! | `time_zone` | `UTC` |
//! | `schedule_tick_secs` | 60 |
//! | `inactivity_tick_secs` | 10 |
//! | `inactivity_threshold_secs` | 600 |
//! | `dispatch_tick_secs` | 60 |
//! | `fallback_timeout_secs` | 300 |
//! | `offer_ttl_secs` | 900 |
//! | `scheduled_pending_ttl_secs` | 86400 |
//! | `max_selection_attempts` | 8 |
//! | `busy_slot_secs` | 3600 |
//! | `late_marks_per_strike` | 3 |
//! | `strikes_per_suspension` | 3 |
//! | `suspension_secs` | 86400 |
//! | `max_consecutive_scan_failures` | 5 |
//! | `schedule_catch_up` | true |

use std::path::Path;

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::orchestrator::OfferTiming;
use crate::penalty::PenaltyPolicy;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DISPATCH";

/// Upper bound for any duration setting (ten years).
const MAX_SECS: u64 = 10 * 365 * 86_400;

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Zone schedules are evaluated in (IANA name).
    pub time_zone: Tz,
    /// Schedule ticker cadence.
    pub schedule_tick_secs: u64,
    /// Inactivity ticker cadence.
    pub inactivity_tick_secs: u64,
    /// Heartbeat silence after which a provider is taken offline.
    pub inactivity_threshold_secs: u64,
    /// Dispatch ticker cadence.
    pub dispatch_tick_secs: u64,
    /// Time a provider has to answer an offer.
    pub fallback_timeout_secs: u64,
    /// Total lifetime of an immediate request.
    pub offer_ttl_secs: u64,
    /// Lifetime of an unanswered scheduled booking.
    pub scheduled_pending_ttl_secs: u64,
    /// Busy candidates skipped before selection gives up.
    pub max_selection_attempts: usize,
    /// A provider holding a request within this many seconds of a new
    /// request's execution time is busy.
    pub busy_slot_secs: u64,
    /// Late marks per strike.
    pub late_marks_per_strike: u32,
    /// Strikes per suspension.
    pub strikes_per_suspension: u32,
    /// Suspension length.
    pub suspension_secs: u64,
    /// Failed scans in a row before a ticker gives up.
    pub max_consecutive_scan_failures: u32,
    /// Apply schedule boundaries missed between two ticks.
    pub schedule_catch_up: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            time_zone: Tz::UTC,
            schedule_tick_secs: 60,
            inactivity_tick_secs: 10,
            inactivity_threshold_secs: 600,
            dispatch_tick_secs: 60,
            fallback_timeout_secs: 300,
            offer_ttl_secs: 900,
            scheduled_pending_ttl_secs: 86_400,
            max_selection_attempts: 8,
            busy_slot_secs: 3_600,
            late_marks_per_strike: 3,
            strikes_per_suspension: 3,
            suspension_secs: 86_400,
            max_consecutive_scan_failures: 5,
            schedule_catch_up: true,
        }
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SECS) as i64)
}

impl DispatchConfig {
    /// Loads defaults, then `path` (if given and present), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            );
        }
        let config: Self = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero cadences, thresholds and limits, and absurd durations.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("schedule_tick_secs", self.schedule_tick_secs),
            ("inactivity_tick_secs", self.inactivity_tick_secs),
            ("inactivity_threshold_secs", self.inactivity_threshold_secs),
            ("dispatch_tick_secs", self.dispatch_tick_secs),
            ("fallback_timeout_secs", self.fallback_timeout_secs),
            ("offer_ttl_secs", self.offer_ttl_secs),
            ("scheduled_pending_ttl_secs", self.scheduled_pending_ttl_secs),
            ("busy_slot_secs", self.busy_slot_secs),
            ("suspension_secs", self.suspension_secs),
        ];
        for (key, value) in durations {
            if value == 0 || value > MAX_SECS {
                return Err(DispatchError::Config(format!(
                    "{key} must be between 1 and {MAX_SECS}, got {value}"
                )));
            }
        }

        let counts = [
            ("max_selection_attempts", self.max_selection_attempts as u64),
            ("late_marks_per_strike", u64::from(self.late_marks_per_strike)),
            ("strikes_per_suspension", u64::from(self.strikes_per_suspension)),
            (
                "max_consecutive_scan_failures",
                u64::from(self.max_consecutive_scan_failures),
            ),
        ];
        if let Some((key, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(DispatchError::Config(format!("{key} must be at least 1")));
        }
        Ok(())
    }

    /// Offer lifecycle timers.
    pub fn offer_timing(&self) -> OfferTiming {
        OfferTiming {
            fallback_timeout: seconds(self.fallback_timeout_secs),
            offer_ttl: seconds(self.offer_ttl_secs),
            scheduled_pending_ttl: seconds(self.scheduled_pending_ttl_secs),
        }
    }

    /// Penalty thresholds.
    pub fn penalty_policy(&self) -> PenaltyPolicy {
        PenaltyPolicy {
            late_marks_per_strike: self.late_marks_per_strike,
            strikes_per_suspension: self.strikes_per_suspension,
            suspension: seconds(self.suspension_secs),
        }
    }

    /// Half-width of the busy-check slot.
    pub fn busy_slot(&self) -> Duration {
        seconds(self.busy_slot_secs)
    }

    /// Heartbeat silence threshold.
    pub fn inactivity_threshold(&self) -> Duration {
        seconds(self.inactivity_threshold_secs)
    }

    /// Schedule ticker cadence.
    pub fn schedule_tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.schedule_tick_secs)
    }

    /// Inactivity ticker cadence.
    pub fn inactivity_tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.inactivity_tick_secs)
    }

    /// Dispatch ticker cadence.
    pub fn dispatch_tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.dispatch_tick_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DispatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.offer_timing(), OfferTiming::default());
        assert_eq!(config.penalty_policy(), PenaltyPolicy::default());
        assert_eq!(config.inactivity_threshold(), Duration::minutes(10));
        assert_eq!(config.busy_slot(), Duration::hours(1));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "time_zone = \"Asia/Seoul\"\nfallback_timeout_secs = 120\nschedule_catch_up = false"
        )
        .unwrap();

        let config = DispatchConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.time_zone, chrono_tz::Asia::Seoul);
        assert_eq!(config.fallback_timeout_secs, 120);
        assert!(!config.schedule_catch_up);
        assert_eq!(config.offer_ttl_secs, 900);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DispatchConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.dispatch_tick_secs, 60);
    }

    #[test]
    fn test_rejects_zero_values() {
        let config = DispatchConfig {
            fallback_timeout_secs: 0,
            ..DispatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(DispatchError::Config(_))));

        let config = DispatchConfig {
            late_marks_per_strike: 0,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "offer_ttl_secs = \"soon\"").unwrap();
        let err = DispatchConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
