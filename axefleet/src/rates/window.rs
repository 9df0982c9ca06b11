//! Day/time window resolution for time-of-use rates and schedules.
//!
//! A window is a day filter plus a start/end time carrying an arbitrary
//! payload: a $/kWh rate, a schedule directive. Resolution scans windows
//! in order and takes the first match, so more specific windows (a
//! Saturday rate) must precede broader ones (a weekday rate).
//!
//! Interval semantics: start is inclusive, end is exclusive, so
//! back-to-back windows like 00:00-14:00 and 14:00-23:59 partition a day
//! without a gap or a double match at 14:00. The one exception is an end
//! of exactly 23:59, which is inclusive so the final minute of the day is
//! covered. A window whose start is after its end wraps past midnight.

use time::{Time, Weekday};

use crate::error::{Error, Result};

/// End-of-day marker; a window ending here includes its end minute.
const END_OF_DAY: Time = time::macros::time!(23:59);

/// Which days a window applies to. A window with no filter applies to
/// every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayFilter {
    Day(Weekday),
    Weekdays,
    Weekends,
}

impl DayFilter {
    pub fn matches(&self, day: Weekday) -> bool {
        let weekend = matches!(day, Weekday::Saturday | Weekday::Sunday);
        match self {
            DayFilter::Day(d) => *d == day,
            DayFilter::Weekdays => !weekend,
            DayFilter::Weekends => weekend,
        }
    }

    /// Parse a filter as it appears in stored rows ("monday", "weekday",
    /// "weekend"). Rejection happens at write time, not at resolution.
    pub fn parse(s: &str) -> Result<DayFilter> {
        let filter = match s.trim().to_ascii_lowercase().as_str() {
            "weekday" | "weekdays" => DayFilter::Weekdays,
            "weekend" | "weekends" => DayFilter::Weekends,
            "monday" => DayFilter::Day(Weekday::Monday),
            "tuesday" => DayFilter::Day(Weekday::Tuesday),
            "wednesday" => DayFilter::Day(Weekday::Wednesday),
            "thursday" => DayFilter::Day(Weekday::Thursday),
            "friday" => DayFilter::Day(Weekday::Friday),
            "saturday" => DayFilter::Day(Weekday::Saturday),
            "sunday" => DayFilter::Day(Weekday::Sunday),
            other => return Err(Error::Config(format!("unknown day filter {other:?}"))),
        };
        Ok(filter)
    }
}

/// One resolvable window with payload `T`.
#[derive(Debug, Clone)]
pub struct RateWindow<T> {
    pub day: Option<DayFilter>,
    pub start: Time,
    pub end: Time,
    pub value: T,
    pub label: String,
}

impl<T> RateWindow<T> {
    pub fn new(
        day: Option<DayFilter>,
        start: Time,
        end: Time,
        value: T,
        label: impl Into<String>,
    ) -> Self {
        Self {
            day,
            start,
            end,
            value,
            label: label.into(),
        }
    }

    pub fn matches(&self, day: Weekday, t: Time) -> bool {
        self.day.is_none_or(|f| f.matches(day)) && time_in_range(t, self.start, self.end)
    }
}

/// Membership test for a window's time span. See the module doc for the
/// boundary and midnight-wrap rules.
pub fn time_in_range(t: Time, start: Time, end: Time) -> bool {
    if start <= end {
        if end == END_OF_DAY {
            t >= start
        } else {
            t >= start && t < end
        }
    } else {
        // Wraps past midnight, e.g. 22:00-06:00.
        t >= start || t < end
    }
}

/// First window matching the given local day and time, if any.
pub fn resolve<T>(day: Weekday, t: Time, windows: &[RateWindow<T>]) -> Option<&RateWindow<T>> {
    windows.iter().find(|w| w.matches(day, t))
}

/// Like [`resolve`], falling back to a default payload when no window
/// covers the instant.
pub fn resolve_value<T: Copy>(day: Weekday, t: Time, windows: &[RateWindow<T>], default: T) -> T {
    resolve(day, t, windows).map(|w| w.value).unwrap_or(default)
}

/// Parse an "HH:MM" boundary, e.g. from a stored rate row.
pub fn parse_hhmm(s: &str) -> Result<Time> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| Error::Config(format!("invalid time {s:?}, expected HH:MM")))?;
    let hour: u8 = h
        .parse()
        .map_err(|_| Error::Config(format!("invalid hour in {s:?}")))?;
    let minute: u8 = m
        .parse()
        .map_err(|_| Error::Config(format!("invalid minute in {s:?}")))?;
    Time::from_hms(hour, minute, 0).map_err(|_| Error::Config(format!("time {s:?} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use time::macros::time;

    #[test_case(time!(14:00), time!(0:00), time!(14:00), false; "end is exclusive")]
    #[test_case(time!(13:59), time!(0:00), time!(14:00), true; "minute before end")]
    #[test_case(time!(0:00), time!(0:00), time!(14:00), true; "start is inclusive")]
    #[test_case(time!(23:59), time!(14:00), time!(23:59), true; "end of day is inclusive")]
    #[test_case(time!(14:00), time!(14:00), time!(23:59), true; "start of evening window")]
    fn should_apply_boundary_rules(t: Time, start: Time, end: Time, expected: bool) {
        assert_eq!(time_in_range(t, start, end), expected);
    }

    #[test_case(time!(23:00), true; "late evening inside wrap")]
    #[test_case(time!(2:00), true; "early morning inside wrap")]
    #[test_case(time!(22:00), true; "wrap start inclusive")]
    #[test_case(time!(6:00), false; "wrap end exclusive")]
    #[test_case(time!(12:00), false; "midday outside wrap")]
    fn should_wrap_past_midnight(t: Time, expected: bool) {
        assert_eq!(time_in_range(t, time!(22:00), time!(6:00)), expected);
    }

    #[test]
    fn should_partition_a_day_without_gap_or_overlap() {
        let windows = vec![
            RateWindow::new(None, time!(0:00), time!(14:00), 0.18, "off-peak"),
            RateWindow::new(None, time!(14:00), time!(23:59), 0.42, "peak"),
        ];

        // Every minute of the day matches exactly one window.
        for minute in 0u16..(24 * 60) {
            let t = Time::from_hms((minute / 60) as u8, (minute % 60) as u8, 0).unwrap();
            let matches = windows
                .iter()
                .filter(|w| w.matches(Weekday::Monday, t))
                .count();
            assert_eq!(matches, 1, "at {t}");
        }
    }

    #[test]
    fn should_prefer_the_first_matching_window() {
        let windows = vec![
            RateWindow::new(
                Some(DayFilter::Day(Weekday::Saturday)),
                time!(0:00),
                time!(23:59),
                0.10,
                "saturday special",
            ),
            RateWindow::new(None, time!(0:00), time!(23:59), 0.30, "every day"),
        ];

        let saturday = resolve(Weekday::Saturday, time!(10:00), &windows).unwrap();
        assert_eq!(saturday.label, "saturday special");

        let tuesday = resolve(Weekday::Tuesday, time!(10:00), &windows).unwrap();
        assert_eq!(tuesday.label, "every day");
    }

    #[test]
    fn should_match_weekday_filter_on_weekdays_only() {
        let windows = vec![RateWindow::new(
            Some(DayFilter::Weekdays),
            time!(9:00),
            time!(17:00),
            0.50,
            "business hours",
        )];

        assert!(resolve(Weekday::Friday, time!(12:00), &windows).is_some());
        assert!(resolve(Weekday::Saturday, time!(12:00), &windows).is_none());
        assert!(resolve(Weekday::Sunday, time!(12:00), &windows).is_none());
    }

    #[test]
    fn should_fall_back_to_default_when_nothing_matches() {
        let windows = vec![RateWindow::new(
            Some(DayFilter::Weekends),
            time!(0:00),
            time!(23:59),
            0.08,
            "weekend",
        )];

        let rate = resolve_value(Weekday::Wednesday, time!(12:00), &windows, 0.25);
        assert_eq!(rate, 0.25);
    }

    #[test]
    fn should_parse_day_filters_from_stored_rows() {
        assert_eq!(DayFilter::parse("weekday").unwrap(), DayFilter::Weekdays);
        assert_eq!(DayFilter::parse("Weekends").unwrap(), DayFilter::Weekends);
        assert_eq!(
            DayFilter::parse("saturday").unwrap(),
            DayFilter::Day(Weekday::Saturday)
        );
        assert!(DayFilter::parse("someday").is_err());
    }

    #[test]
    fn should_reject_malformed_time_strings() {
        assert!(parse_hhmm("14:00").is_ok());
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("12:60").is_err());
        assert!(parse_hhmm("noon").is_err());
        assert!(parse_hhmm("12").is_err());
    }
}
