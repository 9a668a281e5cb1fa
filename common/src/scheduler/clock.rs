// Timezone-aware time calculation
//
// All scheduling decisions reduce to two questions answered here: what is
// the wall-clock time right now in a given IANA timezone, and at which UTC
// instant does a given wall-clock time next occur there. Both are computed
// against a concrete date through the timezone database, never by caching a
// UTC offset, so they stay correct across DST transitions.

use crate::errors::ClockError;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Source of the current instant.
///
/// Production uses [`SystemClock`]; tests substitute a manually advanced
/// clock so timer behavior is deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz, ClockError> {
    Tz::from_str(name).map_err(|_| ClockError::InvalidTimezone(name.to_string()))
}

/// Wall-clock time of day at `instant` in the given timezone.
pub fn local_time_of_day(instant: DateTime<Utc>, timezone: &str) -> Result<NaiveTime, ClockError> {
    let tz = parse_timezone(timezone)?;
    Ok(instant.with_timezone(&tz).time())
}

/// UTC instant at which the wall-clock `time` next occurs in `timezone`,
/// seen from `reference`.
///
/// With `prefer_tomorrow` set the occurrence on the day after `reference`'s
/// local date is returned even if today's has not happened yet. Otherwise
/// today's occurrence is used unless it has already passed. The UTC offset
/// is always taken from the target date, not from `reference`, so a wake
/// scheduled across a DST transition lands on the requested wall-clock time.
pub fn next_occurrence(
    timezone: &str,
    time: NaiveTime,
    reference: DateTime<Utc>,
    prefer_tomorrow: bool,
) -> Result<DateTime<Utc>, ClockError> {
    let tz = parse_timezone(timezone)?;
    let local_reference = reference.with_timezone(&tz);

    let mut date = local_reference.date_naive();
    if prefer_tomorrow || local_reference.time() > time {
        date = date
            .succ_opt()
            .ok_or_else(|| ClockError::DateOutOfRange(timezone.to_string()))?;
    }

    resolve_local(&tz, timezone, date, time)
}

/// Map a local date and time in `tz` to a UTC instant.
///
/// Ambiguous times (fall-back overlap) resolve to the earlier instant.
/// Nonexistent times (spring-forward gap) are stepped forward in 30 minute
/// increments until a representable local time is found.
fn resolve_local(
    tz: &Tz,
    timezone: &str,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<DateTime<Utc>, ClockError> {
    let naive = date.and_time(time);

    if let Some(resolved) = tz.from_local_datetime(&naive).earliest() {
        return Ok(resolved.with_timezone(&Utc));
    }

    // DST gaps are at most a few hours wide; six probes covers them.
    let mut probe = naive;
    for _ in 0..6 {
        probe += Duration::minutes(30);
        if let Some(resolved) = tz.from_local_datetime(&probe).earliest() {
            return Ok(resolved.with_timezone(&Utc));
        }
    }

    Err(ClockError::NonexistentLocalTime {
        timezone: timezone.to_string(),
        datetime: naive.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(time: &str) -> NaiveTime {
        NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_timezone_rejects_garbage() {
        let err = parse_timezone("Mars/Olympus").unwrap_err();
        assert_eq!(err, ClockError::InvalidTimezone("Mars/Olympus".to_string()));
    }

    #[test]
    fn test_local_time_of_day_fixed_offset() {
        // Kolkata is UTC+05:30 year round
        let instant = utc("2025-06-10T02:30:00Z");
        let local = local_time_of_day(instant, "Asia/Kolkata").unwrap();
        assert_eq!(local, at("08:00:00"));
    }

    #[test]
    fn test_next_occurrence_today_when_time_not_passed() {
        // 08:00 in Kolkata, asking for 10:00 local: later today
        let reference = utc("2025-06-10T02:30:00Z");
        let next = next_occurrence("Asia/Kolkata", at("10:00:00"), reference, false).unwrap();
        assert_eq!(next, utc("2025-06-10T04:30:00Z"));
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow_when_passed() {
        // 20:00 in Kolkata, asking for 10:00 local: tomorrow
        let reference = utc("2025-06-10T14:30:00Z");
        let next = next_occurrence("Asia/Kolkata", at("10:00:00"), reference, false).unwrap();
        assert_eq!(next, utc("2025-06-11T04:30:00Z"));
    }

    #[test]
    fn test_next_occurrence_exact_boundary_counts_as_today() {
        let reference = utc("2025-06-10T04:30:00Z"); // exactly 10:00 IST
        let next = next_occurrence("Asia/Kolkata", at("10:00:00"), reference, false).unwrap();
        assert_eq!(next, reference);
    }

    #[test]
    fn test_next_occurrence_prefer_tomorrow_skips_today() {
        let reference = utc("2025-06-10T02:30:00Z"); // 08:00 IST, 10:00 still ahead
        let next = next_occurrence("Asia/Kolkata", at("10:00:00"), reference, true).unwrap();
        assert_eq!(next, utc("2025-06-11T04:30:00Z"));
    }

    #[test]
    fn test_next_occurrence_uses_target_date_offset_across_spring_forward() {
        // New York springs forward on 2024-03-10. Reference is the evening
        // before (EST, UTC-5); the wake lands the next day under EDT (UTC-4).
        let reference = utc("2024-03-09T18:00:00Z"); // 13:00 EST Mar 9
        let next = next_occurrence("America/New_York", at("10:00:00"), reference, true).unwrap();
        assert_eq!(next, utc("2024-03-10T14:00:00Z")); // 10:00 EDT, not 10:00 EST

        let local = local_time_of_day(next, "America/New_York").unwrap();
        assert_eq!(local, at("10:00:00"));
    }

    #[test]
    fn test_next_occurrence_fall_back_stays_on_wall_clock() {
        // New York falls back on 2024-11-03
        let reference = utc("2024-11-02T18:00:00Z"); // 14:00 EDT Nov 2
        let next = next_occurrence("America/New_York", at("10:00:00"), reference, true).unwrap();
        assert_eq!(next, utc("2024-11-03T15:00:00Z")); // 10:00 EST after fall back
    }

    #[test]
    fn test_nonexistent_local_time_steps_past_the_gap() {
        // 02:30 does not exist in New York on 2024-03-10; the clock jumps
        // from 02:00 EST straight to 03:00 EDT.
        let reference = utc("2024-03-09T12:00:00Z");
        let next = next_occurrence("America/New_York", at("02:30:00"), reference, true).unwrap();
        assert_eq!(next, utc("2024-03-10T07:00:00Z")); // 03:00 EDT
    }

    #[test]
    fn test_ambiguous_local_time_resolves_to_earliest() {
        // 01:30 occurs twice in New York on 2024-11-03; earliest is EDT.
        let reference = utc("2024-11-02T12:00:00Z");
        let next = next_occurrence("America/New_York", at("01:30:00"), reference, true).unwrap();
        assert_eq!(next, utc("2024-11-03T05:30:00Z")); // 01:30 EDT
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_local_time_of_day_matches_chrono_tz_directly() {
        let instant = utc("2024-07-01T23:30:00Z");
        let expected = chrono_tz::America::New_York
            .from_utc_datetime(&instant.naive_utc())
            .time();
        assert_eq!(
            local_time_of_day(instant, "America/New_York").unwrap(),
            expected
        );
    }
}
