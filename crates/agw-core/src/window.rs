// SPDX-License-Identifier: MIT OR Apache-2.0

//! UTC calendar-day and calendar-month window math.
//!
//! Trial caps use the UTC calendar day containing the gate's server time;
//! plan budgets use the UTC calendar month. Buckets are half-open intervals
//! aligned to UTC midnights / month starts.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Aggregation bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// UTC calendar day.
    Day,
    /// UTC calendar month.
    Month,
}

/// First instant of the UTC calendar day containing `ts`.
#[must_use]
pub fn day_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), ts.day(), 0, 0, 0)
        .single()
        .unwrap_or(ts)
}

/// First instant of the UTC calendar month containing `ts`.
#[must_use]
pub fn month_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(ts)
}

/// First instant of the UTC calendar month after the one containing `ts`.
///
/// This is the `window_resets_at` value carried in monthly-budget denials.
#[must_use]
pub fn next_month_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if ts.month() == 12 {
        (ts.year() + 1, 1)
    } else {
        (ts.year(), ts.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(ts)
}

/// Start of the bucket containing `ts` for the given granularity.
#[must_use]
pub fn bucket_start(ts: DateTime<Utc>, bucket: Bucket) -> DateTime<Utc> {
    match bucket {
        Bucket::Day => day_start(ts),
        Bucket::Month => month_start(ts),
    }
}

/// Returns `true` if `ts` falls inside the half-open window `[start, end)`.
#[must_use]
pub fn in_window(ts: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    ts >= start && ts < end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn day_start_truncates_to_midnight() {
        assert_eq!(
            day_start(at(2026, 3, 15, 17, 42, 9)),
            at(2026, 3, 15, 0, 0, 0)
        );
    }

    #[test]
    fn month_start_truncates_to_first() {
        assert_eq!(
            month_start(at(2026, 3, 15, 17, 42, 9)),
            at(2026, 3, 1, 0, 0, 0)
        );
    }

    #[test]
    fn next_month_start_rolls_over_december() {
        assert_eq!(
            next_month_start(at(2025, 12, 31, 23, 59, 59)),
            at(2026, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            next_month_start(at(2026, 2, 28, 12, 0, 0)),
            at(2026, 3, 1, 0, 0, 0)
        );
    }

    #[test]
    fn windows_are_half_open() {
        let start = at(2026, 3, 1, 0, 0, 0);
        let end = at(2026, 4, 1, 0, 0, 0);
        assert!(in_window(start, start, end));
        assert!(!in_window(end, start, end));
        assert!(in_window(at(2026, 3, 31, 23, 59, 59), start, end));
    }

    #[test]
    fn every_instant_has_exactly_one_bucket() {
        // A timestamp one second before midnight and one second after land
        // in different day buckets.
        let before = at(2026, 6, 30, 23, 59, 59);
        let after = at(2026, 7, 1, 0, 0, 1);
        assert_ne!(bucket_start(before, Bucket::Day), bucket_start(after, Bucket::Day));
        assert_ne!(
            bucket_start(before, Bucket::Month),
            bucket_start(after, Bucket::Month)
        );
    }
}
