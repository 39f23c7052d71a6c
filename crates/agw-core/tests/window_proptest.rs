// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for UTC window math.

use agw_core::window::{Bucket, bucket_start, day_start, month_start, next_month_start};
use chrono::{Datelike, TimeZone, Timelike, Utc};
use proptest::prelude::*;

prop_compose! {
    fn arb_instant()(secs in 0i64..4_000_000_000i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("in range")
    }
}

proptest! {
    #[test]
    fn day_bucket_contains_its_instant(ts in arb_instant()) {
        let start = day_start(ts);
        prop_assert!(start <= ts);
        prop_assert_eq!(start.hour(), 0);
        prop_assert_eq!(start.minute(), 0);
        prop_assert_eq!(start.second(), 0);
        prop_assert!(ts - start < chrono::Duration::days(1));
    }

    #[test]
    fn month_bucket_contains_its_instant(ts in arb_instant()) {
        let start = month_start(ts);
        prop_assert!(start <= ts);
        prop_assert_eq!(start.day(), 1);
        prop_assert_eq!((start.year(), start.month()), (ts.year(), ts.month()));
    }

    #[test]
    fn month_windows_partition_time(ts in arb_instant()) {
        // Every instant falls in exactly one month window.
        let start = month_start(ts);
        let end = next_month_start(ts);
        prop_assert!(start <= ts && ts < end);
        prop_assert_eq!(month_start(end), end);
    }

    #[test]
    fn bucket_start_is_idempotent(ts in arb_instant()) {
        for bucket in [Bucket::Day, Bucket::Month] {
            let start = bucket_start(ts, bucket);
            prop_assert_eq!(bucket_start(start, bucket), start);
        }
    }
}
