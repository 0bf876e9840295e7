//! Playback Clock
//!
//! Converts between domain time (seconds since the Unix epoch) and the
//! compressed tick counter a playback session advances.
//!
//! One tick covers `time_factor` seconds of domain time. Conversions are
//! floor divisions, so every domain instant maps to exactly one tick.

use std::fmt;

use serde::Serialize;

// =============================================================================
// Types
// =============================================================================

/// Integer unit of virtual time after compressing by a time factor.
pub type Tick = i64;

/// Domain timestamp in seconds since the Unix epoch.
pub type DomainTime = i64;

/// Clock configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Time factor was zero or negative.
    #[error("time factor must be a positive integer, got {0}")]
    NonPositiveTimeFactor(i64),
}

// =============================================================================
// Time Factor
// =============================================================================

/// Seconds of domain time covered by one tick. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TimeFactor(i64);

impl TimeFactor {
    /// One second per tick.
    pub const SECOND: Self = Self(1);
    /// One hour per tick.
    pub const HOUR: Self = Self(60 * 60);
    /// One day per tick.
    pub const DAY: Self = Self(24 * 60 * 60);
    /// Thirty days per tick, the approximation used for monthly series.
    pub const MONTH: Self = Self(30 * 24 * 60 * 60);

    /// Validate a raw time factor.
    ///
    /// # Errors
    ///
    /// Returns `ClockError::NonPositiveTimeFactor` for zero or negative input.
    pub const fn new(seconds: i64) -> Result<Self, ClockError> {
        if seconds <= 0 {
            return Err(ClockError::NonPositiveTimeFactor(seconds));
        }
        Ok(Self(seconds))
    }

    /// Seconds per tick.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        self.0
    }

    /// `floor(time / factor)`.
    #[must_use]
    pub const fn to_tick(self, time: DomainTime) -> Tick {
        time.div_euclid(self.0)
    }

    /// `tick * factor`.
    #[must_use]
    pub const fn to_domain(self, tick: Tick) -> DomainTime {
        tick.saturating_mul(self.0)
    }

    /// Number of whole ticks that fit into `elapsed_secs`.
    ///
    /// Negative elapsed time (wall clock stepped backwards) counts as zero.
    #[must_use]
    pub const fn ticks_in(self, elapsed_secs: i64) -> Tick {
        if elapsed_secs <= 0 {
            0
        } else {
            elapsed_secs / self.0
        }
    }
}

impl fmt::Display for TimeFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl TryFrom<i64> for TimeFactor {
    type Error = ClockError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// =============================================================================
// Playback Clock
// =============================================================================

/// Time factor plus the informational step unit shown to clients.
///
/// Changing the time factor never rescales ticks that were already computed;
/// it only affects subsequent conversions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackClock {
    time_factor: TimeFactor,
    step_unit: String,
}

impl PlaybackClock {
    /// Create a clock.
    #[must_use]
    pub fn new(time_factor: TimeFactor, step_unit: impl Into<String>) -> Self {
        Self {
            time_factor,
            step_unit: step_unit.into(),
        }
    }

    /// Current time factor.
    #[must_use]
    pub const fn time_factor(&self) -> TimeFactor {
        self.time_factor
    }

    /// Step unit label (e.g. `month`).
    #[must_use]
    pub fn step_unit(&self) -> &str {
        &self.step_unit
    }

    /// Replace the time factor.
    pub const fn set_time_factor(&mut self, time_factor: TimeFactor) {
        self.time_factor = time_factor;
    }

    /// Convert a domain timestamp to a tick.
    #[must_use]
    pub const fn to_tick(&self, time: DomainTime) -> Tick {
        self.time_factor.to_tick(time)
    }

    /// Convert a tick back to domain time.
    #[must_use]
    pub const fn to_domain(&self, tick: Tick) -> DomainTime {
        self.time_factor.to_domain(tick)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test_case(0 ; "zero")]
    #[test_case(-1 ; "negative")]
    #[test_case(i64::MIN ; "minimum")]
    fn rejects_non_positive_time_factor(raw: i64) {
        assert_eq!(
            TimeFactor::new(raw),
            Err(ClockError::NonPositiveTimeFactor(raw))
        );
    }

    #[test_case(7200, 3600, 2 ; "exact hours")]
    #[test_case(7199, 3600, 1 ; "floors down")]
    #[test_case(0, 60, 0 ; "epoch")]
    #[test_case(-1, 60, -1 ; "floors negative towards minus infinity")]
    fn to_tick_is_floor_division(time: i64, factor: i64, expected: Tick) {
        let factor = TimeFactor::new(factor).unwrap();
        assert_eq!(factor.to_tick(time), expected);
    }

    #[test]
    fn ticks_in_ignores_negative_elapsed() {
        assert_eq!(TimeFactor::new(60).unwrap().ticks_in(-300), 0);
        assert_eq!(TimeFactor::new(60).unwrap().ticks_in(300), 5);
        assert_eq!(TimeFactor::new(60).unwrap().ticks_in(359), 5);
    }

    #[test]
    fn speed_change_does_not_rescale_existing_ticks() {
        let mut clock = PlaybackClock::new(TimeFactor::HOUR, "hour");
        let tick = clock.to_tick(7200);
        clock.set_time_factor(TimeFactor::DAY);

        assert_eq!(tick, 2);
        assert_eq!(clock.to_domain(tick), 2 * 86_400);
        assert_eq!(clock.step_unit(), "hour");
    }

    #[test]
    fn display_shows_seconds() {
        assert_eq!(TimeFactor::DAY.to_string(), "86400s");
    }

    proptest! {
        #[test]
        fn domain_round_trip(tick in -1_000_000_000i64..1_000_000_000, factor in 1i64..10_000_000) {
            let factor = TimeFactor::new(factor).unwrap();
            prop_assert_eq!(factor.to_tick(factor.to_domain(tick)), tick);
        }

        #[test]
        fn tick_start_never_exceeds_time(time in -1_000_000_000_000i64..1_000_000_000_000, factor in 1i64..10_000_000) {
            let factor = TimeFactor::new(factor).unwrap();
            let tick = factor.to_tick(time);
            prop_assert!(factor.to_domain(tick) <= time);
            prop_assert!(factor.to_domain(tick + 1) > time);
        }
    }
}
