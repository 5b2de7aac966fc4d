//! New Year countdown
//!
//! Tracks the time left until midnight on January 1st and reports the moment
//! it is reached exactly once.

use chrono::{DateTime, Datelike, Duration, TimeZone};
use std::fmt;

/// Time left, broken down for display. All zero once the target has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Remaining {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Remaining {
    pub fn from_seconds(total: i64) -> Self {
        if total <= 0 {
            return Self::default();
        }
        Self {
            days: total / 86_400,
            hours: (total / 3_600) % 24,
            minutes: (total / 60) % 60,
            seconds: total % 60,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}d {:02}:{:02}:{:02}",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

/// Midnight on the next January 1st in `now`'s time zone.
pub fn next_new_year<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    now.timezone()
        .with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0)
        .earliest()
}

#[derive(Debug, Clone)]
pub struct Countdown<Tz: TimeZone> {
    target: DateTime<Tz>,
    fired: bool,
}

impl<Tz: TimeZone> Countdown<Tz> {
    pub fn new_year(now: &DateTime<Tz>) -> Self {
        let target = next_new_year(now).unwrap_or_else(|| now.clone() + Duration::days(365));
        Self::until(target)
    }

    pub fn until(target: DateTime<Tz>) -> Self {
        Self {
            target,
            fired: false,
        }
    }

    pub fn target(&self) -> &DateTime<Tz> {
        &self.target
    }

    /// Retarget to `seconds` from `now` and re-arm.
    pub fn simulate_in(&mut self, now: &DateTime<Tz>, seconds: i64) {
        self.target = now.clone() + Duration::seconds(seconds);
        self.fired = false;
    }

    pub fn remaining(&self, now: &DateTime<Tz>) -> Remaining {
        let left = self
            .target
            .clone()
            .signed_duration_since(now.clone())
            .num_seconds();
        Remaining::from_seconds(left)
    }

    pub fn is_midnight(&self, now: &DateTime<Tz>) -> bool {
        *now >= self.target
    }

    /// True exactly once, on the first poll at or after the target.
    pub fn poll(&mut self, now: &DateTime<Tz>) -> bool {
        if self.fired || !self.is_midnight(now) {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_targets_next_january_first() {
        let now = Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap();
        let countdown = Countdown::new_year(&now);
        assert_eq!(
            *countdown.target(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );

        // On New Year's Day itself the next one is a year away.
        let new_years_day = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(
            next_new_year(&new_years_day),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).single()
        );
    }

    #[test]
    fn test_remaining_breakdown() {
        let now = Utc.with_ymd_and_hms(2025, 12, 30, 20, 58, 15).unwrap();
        let countdown = Countdown::new_year(&now);
        let left = countdown.remaining(&now);
        assert_eq!(
            left,
            Remaining {
                days: 1,
                hours: 3,
                minutes: 1,
                seconds: 45
            }
        );
        assert_eq!(left.to_string(), "1d 03:01:45");
    }

    #[test]
    fn test_remaining_is_zero_after_target() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 5).unwrap();
        let countdown = Countdown::until(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        assert!(countdown.remaining(&now).is_zero());
        assert!(countdown.is_midnight(&now));
    }

    #[test]
    fn test_poll_fires_once() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut countdown = Countdown::new_year(&start);
        countdown.simulate_in(&start, 10);

        assert!(!countdown.poll(&(start + Duration::seconds(9))));
        assert!(countdown.poll(&(start + Duration::seconds(10))));
        assert!(!countdown.poll(&(start + Duration::seconds(11))));
        assert!(countdown.has_fired());

        // Retargeting re-arms.
        let later = start + Duration::seconds(20);
        countdown.simulate_in(&later, 0);
        assert!(countdown.poll(&later));
    }
}
