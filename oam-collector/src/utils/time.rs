//! Interval alignment shared by the scheduler and the fetch window computation.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Timelike, Utc};

/// `now` truncated to the minute.
pub fn truncate_to_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Boundary candidate for `now`: the minute mark that is a multiple of
/// `interval` shifted by `delay`, possibly in the past or the future.
///
/// `diff = minute - (minute / interval) * interval - delay`, candidate = now - diff.
pub fn aligned_candidate(now: DateTime<Utc>, interval_minutes: u32, delay_minutes: u32) -> DateTime<Utc> {
    let interval = i64::from(interval_minutes.max(1));
    let minute = i64::from(now.minute());
    let diff = minute - (minute / interval) * interval - i64::from(delay_minutes);
    truncate_to_minute(now) - Duration::minutes(diff)
}

/// First trigger time of a schedule: the candidate, pushed one interval
/// forward when it is not in the future.
pub fn next_boundary(now: DateTime<Utc>, interval_minutes: u32, delay_minutes: u32) -> DateTime<Utc> {
    let candidate = aligned_candidate(now, interval_minutes, delay_minutes);
    if candidate <= now {
        candidate + Duration::minutes(i64::from(interval_minutes.max(1)))
    } else {
        candidate
    }
}

/// Latest boundary not after `now`; the end of the current fetch window.
pub fn window_end(now: DateTime<Utc>, interval_minutes: u32, delay_minutes: u32) -> DateTime<Utc> {
    let step = Duration::minutes(i64::from(interval_minutes.max(1)));
    let mut end = aligned_candidate(now, interval_minutes, delay_minutes);
    while end > now {
        end -= step;
    }
    end
}

/// Parse an event time as reported by the OAM API.
///
/// Accepts RFC3339 and the `+HHMM` offset variant, e.g.
/// `2024-03-01T10:15:00.000+0000`.
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(t) = DateTime::<FixedOffset>::parse_from_str(raw, format) {
            return Some(t.with_timezone(&Utc));
        }
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_next_boundary_example() {
        // diff = 9 - 0 - 7 = 2 -> candidate 20:07 is past -> 20:22
        assert_eq!(aligned_candidate(at(20, 9, 0), 15, 7), at(20, 7, 0));
        assert_eq!(next_boundary(at(20, 9, 0), 15, 7), at(20, 22, 0));
    }

    #[test]
    fn test_next_boundary_future_candidate_is_kept() {
        // diff = 3 - 0 - 7 = -4 -> 20:07
        assert_eq!(next_boundary(at(20, 3, 30), 15, 7), at(20, 7, 0));
    }

    #[test]
    fn test_next_boundary_on_exact_mark_moves_forward() {
        assert_eq!(next_boundary(at(20, 7, 0), 15, 7), at(20, 22, 0));
        assert_eq!(next_boundary(at(20, 7, 45), 15, 7), at(20, 22, 0));
    }

    #[test]
    fn test_next_boundary_is_future_and_congruent() {
        for interval in [1u32, 5, 10, 15, 30, 60] {
            for delay in [0u32, 1, 3, 7] {
                if delay >= interval {
                    continue;
                }
                for minute in 0..60 {
                    for second in [0, 31] {
                        let now = at(13, minute, second);
                        let boundary = next_boundary(now, interval, delay);
                        assert!(boundary > now, "{boundary} <= {now}");
                        assert!(boundary - now <= Duration::minutes(i64::from(interval)));
                        assert_eq!(boundary.second(), 0);
                        let offset = (i64::from(boundary.minute()) - i64::from(delay))
                            .rem_euclid(i64::from(interval));
                        assert_eq!(offset, 0, "interval {interval} delay {delay} now {now}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_window_end_is_latest_past_boundary() {
        assert_eq!(window_end(at(20, 9, 0), 15, 7), at(20, 7, 0));
        assert_eq!(window_end(at(20, 3, 0), 15, 7), at(19, 52, 0));
        assert_eq!(window_end(at(20, 30, 10), 15, 0), at(20, 30, 0));
    }

    #[test]
    fn test_parse_event_time_formats() {
        let expected = at(10, 15, 0);
        assert_eq!(parse_event_time("2024-03-01T10:15:00Z"), Some(expected));
        assert_eq!(parse_event_time("2024-03-01T12:15:00+02:00"), Some(expected));
        assert_eq!(parse_event_time("2024-03-01T10:15:00.000+0000"), Some(expected));
        assert_eq!(parse_event_time("2024-03-01 10:15:00"), Some(expected));
        assert_eq!(parse_event_time("yesterday"), None);
    }
}
