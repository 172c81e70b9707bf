//! The closed set of recurring schedules and their next-run computation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};

use crate::error::MaintenanceError;

const FOUR_HOURS: i64 = 4 * 3600;
const SIX_HOURS: i64 = 6 * 3600;

/// When a maintenance job recurs.
///
/// Interval cadences are aligned to UTC epoch boundaries; calendar
/// cadences fire at the given local hour in the scheduler's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    EveryFourHours,
    EverySixHours,
    Daily { hour: u32 },
    Weekly { weekday: Weekday, hour: u32 },
    /// On the first day of the month
    Monthly { hour: u32 },
}

impl Cadence {
    /// Reject calendar cadences whose hour is not a wall-clock hour.
    pub fn validate(&self) -> Result<(), MaintenanceError> {
        let hour = match *self {
            Cadence::EveryFourHours | Cadence::EverySixHours => return Ok(()),
            Cadence::Daily { hour } | Cadence::Weekly { hour, .. } | Cadence::Monthly { hour } => {
                hour
            }
        };
        if hour > 23 {
            return Err(MaintenanceError::InvalidCadence {
                cadence: self.to_string(),
            });
        }
        Ok(())
    }

    /// First occurrence strictly after `after`. The cadence must have
    /// passed [`Self::validate`].
    pub fn next_after(&self, after: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
        let next = match *self {
            Cadence::EveryFourHours => next_aligned(after, FOUR_HOURS),
            Cadence::EverySixHours => next_aligned(after, SIX_HOURS),
            Cadence::Daily { hour } => next_local(after, tz, hour, |_| true),
            Cadence::Weekly { weekday, hour } => {
                next_local(after, tz, hour, |date| date.weekday() == weekday)
            }
            Cadence::Monthly { hour } => next_local(after, tz, hour, |date| date.day() == 1),
        };
        // Only reachable at the edges of the representable time range
        next.unwrap_or_else(|| after + Duration::days(1))
    }
}

fn next_aligned(after: DateTime<Utc>, period_secs: i64) -> Option<DateTime<Utc>> {
    let next = (after.timestamp().div_euclid(period_secs) + 1) * period_secs;
    DateTime::from_timestamp(next, 0)
}

/// Next local date matching `matches` at `hour:00` that is after `after`.
fn next_local(
    after: DateTime<Utc>,
    tz: &Tz,
    hour: u32,
    matches: impl Fn(NaiveDate) -> bool,
) -> Option<DateTime<Utc>> {
    let mut date = after.with_timezone(tz).date_naive();
    // Long enough to reach the first of the next month
    for _ in 0..=62 {
        if matches(date) {
            let candidate = resolve_local(tz, date, hour)?;
            if candidate > after {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// `date` at `hour:00` local time. A time inside a DST gap moves forward to
/// the first valid hour; an ambiguous time takes the earlier instant.
fn resolve_local(tz: &Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let mut local = date.and_time(time);
    for _ in 0..3 {
        if let Some(resolved) = tz.from_local_datetime(&local).earliest() {
            return Some(resolved.with_timezone(&Utc));
        }
        local += Duration::hours(1);
    }
    None
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::EveryFourHours => write!(f, "every 4 hours"),
            Cadence::EverySixHours => write!(f, "every 6 hours"),
            Cadence::Daily { hour } => write!(f, "daily at {hour:02}:00"),
            Cadence::Weekly { weekday, hour } => write!(f, "weekly on {weekday} at {hour:02}:00"),
            Cadence::Monthly { hour } => write!(f, "monthly on day 1 at {hour:02}:00"),
        }
    }
}

impl Serialize for Cadence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_interval_cadences_align() {
        let tz = Tz::UTC;
        assert_eq!(
            Cadence::EveryFourHours.next_after(utc(2026, 3, 4, 9, 15), &tz),
            utc(2026, 3, 4, 12, 0)
        );
        assert_eq!(
            Cadence::EveryFourHours.next_after(utc(2026, 3, 4, 12, 0), &tz),
            utc(2026, 3, 4, 16, 0)
        );
        assert_eq!(
            Cadence::EverySixHours.next_after(utc(2026, 3, 4, 19, 0), &tz),
            utc(2026, 3, 5, 0, 0)
        );
    }

    #[test]
    fn test_daily() {
        let tz = Tz::UTC;
        let daily = Cadence::Daily { hour: 2 };
        assert_eq!(daily.next_after(utc(2026, 3, 4, 1, 59), &tz), utc(2026, 3, 4, 2, 0));
        assert_eq!(daily.next_after(utc(2026, 3, 4, 2, 0), &tz), utc(2026, 3, 5, 2, 0));
    }

    #[test]
    fn test_weekly_on_sunday() {
        let tz = Tz::UTC;
        let weekly = Cadence::Weekly {
            weekday: Weekday::Sun,
            hour: 3,
        };
        // 2026-03-04 is a Wednesday
        assert_eq!(weekly.next_after(utc(2026, 3, 4, 10, 0), &tz), utc(2026, 3, 8, 3, 0));
        assert_eq!(weekly.next_after(utc(2026, 3, 8, 3, 0), &tz), utc(2026, 3, 15, 3, 0));
    }

    #[test]
    fn test_monthly_on_first() {
        let tz = Tz::UTC;
        let monthly = Cadence::Monthly { hour: 4 };
        assert_eq!(monthly.next_after(utc(2026, 1, 31, 12, 0), &tz), utc(2026, 2, 1, 4, 0));
        assert_eq!(monthly.next_after(utc(2026, 12, 1, 4, 0), &tz), utc(2027, 1, 1, 4, 0));
        assert_eq!(monthly.next_after(utc(2026, 3, 1, 3, 59), &tz), utc(2026, 3, 1, 4, 0));
    }

    #[test]
    fn test_local_timezone() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let daily = Cadence::Daily { hour: 2 };
        // 02:00 CET is 01:00 UTC in winter
        assert_eq!(daily.next_after(utc(2026, 1, 10, 12, 0), &tz), utc(2026, 1, 11, 1, 0));
        // 2026-03-29 02:00 does not exist in Berlin; 03:00 CEST is 01:00 UTC
        assert_eq!(daily.next_after(utc(2026, 3, 28, 12, 0), &tz), utc(2026, 3, 29, 1, 0));
    }

    #[test]
    fn test_out_of_range_hour_rejected() {
        assert!(Cadence::EverySixHours.validate().is_ok());
        assert!(Cadence::Daily { hour: 23 }.validate().is_ok());
        assert!(Cadence::Monthly { hour: 0 }.validate().is_ok());

        let err = Cadence::Weekly {
            weekday: Weekday::Sun,
            hour: 24,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, MaintenanceError::InvalidCadence { ref cadence } if cadence == "weekly on Sun at 24:00"));
        assert!(Cadence::Daily { hour: 99 }.validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Cadence::EveryFourHours.to_string(), "every 4 hours");
        assert_eq!(Cadence::Daily { hour: 2 }.to_string(), "daily at 02:00");
        assert_eq!(
            Cadence::Weekly {
                weekday: Weekday::Sun,
                hour: 3
            }
            .to_string(),
            "weekly on Sun at 03:00"
        );
        assert_eq!(
            Cadence::Monthly { hour: 4 }.to_string(),
            "monthly on day 1 at 04:00"
        );
    }
}
