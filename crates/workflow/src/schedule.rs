use chrono::{DateTime, Duration, Timelike, Utc};
use mindloop_config::ActiveHours;

/// Whether `now` falls inside the active-hours window.
///
/// Hours are local to `utc_offset_minutes`; `end` is exclusive. A window
/// with `start > end` wraps midnight (22..6 covers 23:00 and 05:00).
/// `start == end` is an empty window.
pub fn is_within_active_hours(hours: &ActiveHours, now: DateTime<Utc>) -> bool {
    let local = now + Duration::minutes(i64::from(hours.utc_offset_minutes));
    let hour = local.hour();
    if hours.start <= hours.end {
        hour >= hours.start && hour < hours.end
    } else {
        hour >= hours.start || hour < hours.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    fn hours(start: u32, end: u32, offset: i32) -> ActiveHours {
        ActiveHours {
            start,
            end,
            utc_offset_minutes: offset,
        }
    }

    #[test]
    fn daytime_window_has_exclusive_end() {
        let window = hours(8, 22, 0);
        assert!(!is_within_active_hours(&window, at(7, 59)));
        assert!(is_within_active_hours(&window, at(8, 0)));
        assert!(is_within_active_hours(&window, at(21, 59)));
        assert!(!is_within_active_hours(&window, at(22, 0)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let window = hours(22, 6, 0);
        assert!(is_within_active_hours(&window, at(23, 0)));
        assert!(is_within_active_hours(&window, at(5, 30)));
        assert!(!is_within_active_hours(&window, at(12, 0)));
    }

    #[test]
    fn offset_shifts_to_local_time() {
        // 06:00 UTC is 08:00 at +02:00
        let window = hours(8, 22, 120);
        assert!(is_within_active_hours(&window, at(6, 0)));
        assert!(!is_within_active_hours(&window, at(20, 30)));

        // 03:00 UTC is 22:00 the previous day at -05:00
        let window = hours(9, 22, -300);
        assert!(!is_within_active_hours(&window, at(3, 0)));
        assert!(is_within_active_hours(&window, at(2, 59)));
    }

    #[test]
    fn equal_bounds_never_match() {
        let window = hours(9, 9, 0);
        assert!(!is_within_active_hours(&window, at(9, 0)));
        assert!(!is_within_active_hours(&window, at(15, 0)));
    }
}
