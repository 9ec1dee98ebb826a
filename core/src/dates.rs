//! Date parsing and calendar arithmetic.
//!
//! All engine dates are `NaiveDate`: the platform reports due and payment
//! dates as calendar days, and interest is counted in whole days.

use crate::error::{InterestError, InterestResult};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime};

/// Parse a date in any of the shapes the accounting platform emits:
///
/// - `/Date(1735689600000+0000)/` (epoch milliseconds, legacy JSON)
/// - `2025-01-01T00:00:00Z` / `2025-01-01T00:00:00+13:00` (RFC 3339)
/// - `2025-01-01T00:00:00` (naive timestamp, optional fraction)
/// - `2025-01-01`
pub fn parse_date(raw: &str) -> InterestResult<NaiveDate> {
    let s = raw.trim();
    let malformed = || InterestError::MalformedDate { raw: raw.to_string() };

    if let Some(inner) = s.strip_prefix("/Date(").and_then(|r| r.strip_suffix(")/")) {
        // Offset suffix ("+0000") only shifts display; the instant is UTC.
        let digits_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i)
            .unwrap_or(inner.len());
        let millis: i64 = inner[..digits_end].parse().map_err(|_| malformed())?;
        return DateTime::from_timestamp_millis(millis)
            .map(|dt| dt.date_naive())
            .ok_or_else(malformed);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt.date());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| malformed())
}

/// Whole days from `from` to `to` (negative when `to` is earlier).
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let start = first_of_month(date);
    start.checked_add_months(Months::new(1)).unwrap_or(start)
}

pub fn last_of_month(date: NaiveDate) -> NaiveDate {
    add_days(next_month_start(date), -1)
}

/// `YYYY-MM` bucket key for the month containing `date`.
pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// First day of every calendar month touched by `[start, end)`.
pub fn month_starts(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    if start >= end {
        return months;
    }
    let mut cursor = first_of_month(start);
    while cursor < end {
        months.push(cursor);
        cursor = next_month_start(cursor);
    }
    months
}

/// Number of days two half-open ranges `[a0, a1)` and `[b0, b1)` share.
pub fn overlap_days(a0: NaiveDate, a1: NaiveDate, b0: NaiveDate, b1: NaiveDate) -> i64 {
    let start = a0.max(b0);
    let end = a1.min(b1);
    days_between(start, end).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_platform_date_shapes() {
        assert_eq!(parse_date("/Date(1735689600000+0000)/").unwrap(), d(2025, 1, 1));
        assert_eq!(parse_date("/Date(1735689600000)/").unwrap(), d(2025, 1, 1));
        assert_eq!(parse_date("2025-01-01T00:00:00").unwrap(), d(2025, 1, 1));
        assert_eq!(parse_date("2025-01-01T00:00:00.000").unwrap(), d(2025, 1, 1));
        assert_eq!(parse_date("2025-01-01T09:30:00+13:00").unwrap(), d(2025, 1, 1));
        assert_eq!(parse_date(" 2025-02-28 ").unwrap(), d(2025, 2, 28));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_date("next tuesday"),
            Err(InterestError::MalformedDate { .. })
        ));
        assert!(parse_date("/Date(abc)/").is_err());
        assert!(parse_date("2025-13-01").is_err());
    }

    #[test]
    fn month_arithmetic() {
        assert_eq!(last_of_month(d(2025, 2, 10)), d(2025, 2, 28));
        assert_eq!(last_of_month(d(2024, 2, 10)), d(2024, 2, 29));
        assert_eq!(next_month_start(d(2024, 12, 31)), d(2025, 1, 1));
        assert_eq!(month_key(d(2025, 3, 9)), "2025-03");
        assert_eq!(
            month_starts(d(2025, 1, 15), d(2025, 3, 1)),
            vec![d(2025, 1, 1), d(2025, 2, 1)]
        );
        assert!(month_starts(d(2025, 3, 1), d(2025, 3, 1)).is_empty());
    }

    #[test]
    fn overlap_is_clamped_at_zero() {
        assert_eq!(overlap_days(d(2025, 1, 1), d(2025, 2, 1), d(2025, 1, 31), d(2025, 3, 1)), 1);
        assert_eq!(overlap_days(d(2025, 1, 1), d(2025, 1, 10), d(2025, 2, 1), d(2025, 3, 1)), 0);
    }
}
