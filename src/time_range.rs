// Resolution of start/end/period arguments into a concrete UTC range.

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Duration, Utc};

/// Look-back used when neither a start nor a period is given.
pub const DEFAULT_PERIOD: &str = "60d";

/// Parses a period such as `"90m"`, `"12h"`, `"60d"` or `"2w"`.
///
/// Units: `s`, `m`/`min`, `h`, `d`, `w`. The amount must be a non-negative integer.
pub fn parse_period(period: &str) -> Result<Duration> {
    let s = period.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid_period(period))?;
    let (amount, unit) = s.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid_period(period))?;
    let duration = match unit.trim().to_ascii_lowercase().as_str() {
        "s" => Duration::try_seconds(amount),
        "m" | "min" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => None,
    };
    duration.ok_or_else(|| invalid_period(period))
}

fn invalid_period(period: &str) -> AnalyticsError {
    AnalyticsError::InvalidConfig(format!(
        "invalid period '{}' (expected e.g. 30m, 12h, 60d, 2w)",
        period
    ))
}

/// Resolves the analysis window.
///
/// `start` and `period` are mutually exclusive. Without a start the window is
/// `[end - period, end]` (period defaulting to [`DEFAULT_PERIOD`], end to
/// `now`). With a start, end defaults to `now` and must be strictly later.
pub fn resolve_time_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    period: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = end.unwrap_or(now);
    match (start, period) {
        (Some(_), Some(_)) => Err(AnalyticsError::InvalidConfig(
            "use either start/end or period, not both".to_string(),
        )),
        (None, period) => {
            let period = period.unwrap_or(DEFAULT_PERIOD);
            let span = parse_period(period)?;
            let start = end.checked_sub_signed(span).ok_or_else(|| {
                AnalyticsError::InvalidConfig(format!(
                    "period '{}' reaches before the earliest representable date",
                    period
                ))
            })?;
            Ok((start, end))
        }
        (Some(start), None) => {
            if end <= start {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "end ({}) must be after start ({})",
                    end, start
                )));
            }
            Ok((start, end))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn period_past_the_calendar_range_is_rejected() {
        let err = resolve_time_range(None, None, Some("100000000w"), now()).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidConfig(_)));
        assert!(resolve_time_range(None, None, Some("5200w"), now()).is_ok());
    }

    #[test]
    fn parses_period_units() {
        assert_eq!(parse_period("45s").unwrap(), Duration::seconds(45));
        assert_eq!(parse_period("90m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_period("5min").unwrap(), Duration::minutes(5));
        assert_eq!(parse_period("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_period("60d").unwrap(), Duration::days(60));
        assert_eq!(parse_period("2w").unwrap(), Duration::weeks(2));
        assert!(parse_period("d").is_err());
        assert!(parse_period("10").is_err());
        assert!(parse_period("3y").is_err());
    }

    #[test]
    fn default_period_is_sixty_days() {
        let (start, end) = resolve_time_range(None, None, None, now()).unwrap();
        assert_eq!(end, now());
        assert_eq!(end - start, Duration::days(60));
    }

    #[test]
    fn period_counts_back_from_end() {
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let (start, resolved_end) = resolve_time_range(None, Some(end), Some("1w"), now()).unwrap();
        assert_eq!(resolved_end, end);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 25, 0, 0, 0).unwrap());
    }

    #[test]
    fn start_and_period_conflict() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = resolve_time_range(Some(start), None, Some("1d"), now()).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidConfig(_)));
    }

    #[test]
    fn end_must_follow_start() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(resolve_time_range(Some(start), Some(start), None, now()).is_err());
        let (s, e) = resolve_time_range(Some(start), None, None, now()).unwrap();
        assert_eq!((s, e), (start, now()));
    }
}
