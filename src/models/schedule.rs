//! Weekly availability schedules.
//!
//! A provider driven by a schedule declares at most one window per weekday,
//! written as 24h `HH:MM` strings. Evaluation is a pure function of the
//! table and an instant in a fixed time zone.
//!
//! # Window Semantics
//! - `from < to`: matches `[from, to)` on the same day.
//! - `from > to`: crosses midnight, matches `[from, 24:00) ∪ [00:00, to)`.
//! - `from == to`, malformed strings, or a missing day: never matches.
//!
//! Only the entry for the weekday of the evaluated instant is consulted; an
//! overnight window configured for Monday covers early Monday morning as well
//! as late Monday evening.
//!
//! # Boundaries
//! A boundary is the exact minute a valid window begins or ends. The
//! scheduled-availability ticker only acts on boundaries.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Minutes per day.
const MINUTES_PER_DAY: u16 = 24 * 60;

/// Upper bound on the number of minutes scanned for a missed boundary.
const MAX_CATCH_UP_MINUTES: i64 = 7 * MINUTES_PER_DAY as i64;

/// A wall-clock time of day with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    minutes: u16,
}

impl ClockTime {
    /// Creates a clock time, rejecting out-of-range components.
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self {
                minutes: (hour * 60 + minute) as u16,
            })
        } else {
            None
        }
    }

    /// Parses a strict 24h `HH:MM` string.
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        Self::new(h.parse().ok()?, m.parse().ok()?)
    }

    /// Minute of the day of a local timestamp (seconds discarded).
    pub fn of<T: Timelike>(time: &T) -> Self {
        Self {
            minutes: (time.hour() * 60 + time.minute()) as u16,
        }
    }

    /// Minutes since local midnight.
    #[inline]
    pub fn minutes(&self) -> u16 {
        self.minutes
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

/// One weekday's availability window, as configured by the provider.
///
/// Stored raw so that malformed input survives a round trip and simply
/// evaluates to "not available".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWindow {
    /// Start time, `HH:MM` (inclusive).
    pub from: String,
    /// End time, `HH:MM` (exclusive).
    pub to: String,
}

impl DailyWindow {
    /// Creates a window from raw `HH:MM` strings.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Parsed bounds, or `None` for malformed or empty windows.
    pub fn bounds(&self) -> Option<(ClockTime, ClockTime)> {
        let from = ClockTime::parse(&self.from)?;
        let to = ClockTime::parse(&self.to)?;
        (from != to).then_some((from, to))
    }

    /// Whether the window is usable at all.
    pub fn is_valid(&self) -> bool {
        self.bounds().is_some()
    }

    /// Whether the window crosses midnight.
    pub fn is_overnight(&self) -> bool {
        matches!(self.bounds(), Some((from, to)) if from > to)
    }

    /// Whether a time of day falls inside the window.
    pub fn contains(&self, time: ClockTime) -> bool {
        match self.bounds() {
            None => false,
            Some((from, to)) if from < to => time >= from && time < to,
            Some((from, to)) => time >= from || time < to,
        }
    }

    /// Whether a time of day is exactly the window's start or end.
    pub fn is_boundary(&self, time: ClockTime) -> bool {
        match self.bounds() {
            None => false,
            Some((from, to)) => time == from || time == to,
        }
    }

    /// Length of the window in minutes (0 for invalid windows).
    pub fn duration_minutes(&self) -> u16 {
        match self.bounds() {
            None => 0,
            Some((from, to)) if from < to => to.minutes() - from.minutes(),
            Some((from, to)) => MINUTES_PER_DAY - from.minutes() + to.minutes(),
        }
    }
}

/// A provider's weekly availability table.
///
/// Empty = never available under a schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule {
    days: HashMap<Weekday, DailyWindow>,
}

impl WeeklySchedule {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the window for a weekday (replacing any previous one).
    pub fn with_window(
        mut self,
        day: Weekday,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.days.insert(day, DailyWindow::new(from, to));
        self
    }

    /// Sets the same window for every weekday.
    pub fn every_day(from: &str, to: &str) -> Self {
        let days = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        days.into_iter()
            .fold(Self::new(), |s, day| s.with_window(day, from, to))
    }

    /// The configured window for a weekday.
    pub fn window(&self, day: Weekday) -> Option<&DailyWindow> {
        self.days.get(&day)
    }

    /// Whether no weekday is configured.
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Whether at least one weekday carries a usable window.
    pub fn has_valid_windows(&self) -> bool {
        self.days.values().any(DailyWindow::is_valid)
    }

    /// Whether `time` on `day` falls inside that day's window.
    pub fn is_active(&self, day: Weekday, time: ClockTime) -> bool {
        self.window(day).is_some_and(|w| w.contains(time))
    }

    /// Whether `time` on `day` is a start or end of that day's window.
    pub fn is_boundary(&self, day: Weekday, time: ClockTime) -> bool {
        self.window(day).is_some_and(|w| w.is_boundary(time))
    }

    /// Evaluates the schedule at an instant, in the given time zone.
    pub fn is_active_at(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        let local = now.with_timezone(&tz);
        self.is_active(local.weekday(), ClockTime::of(&local))
    }

    /// Whether the minute containing `now` is a boundary.
    pub fn is_boundary_at(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        let local = now.with_timezone(&tz);
        self.is_boundary(local.weekday(), ClockTime::of(&local))
    }

    /// Whether any boundary minute lies in `(since, now]`.
    ///
    /// Minutes are compared at minute resolution, so two instants within the
    /// same minute never cross anything. Gaps longer than a week are clamped.
    pub fn boundary_crossed(&self, since: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> bool {
        let last = now.timestamp().div_euclid(60);
        let first = (since.timestamp().div_euclid(60) + 1).max(last - MAX_CATCH_UP_MINUTES + 1);

        (first..=last)
            .filter_map(|minute| DateTime::<Utc>::from_timestamp(minute * 60, 0))
            .any(|instant| self.is_boundary_at(instant, tz))
    }
}
