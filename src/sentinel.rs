//! Named fill values used at stage boundaries.
//!
//! When more than one sentinel could describe a value, precedence is:
//! a real observation, then [`FORWARD_FILL_PLACEHOLDER_MILLIS`], then
//! [`NEVER_OBSERVED`]. [`UNKNOWN_BALANCE`] only ever applies to `upb_12` and
//! [`MISSING_VALUE`] only to columns that reached the null-workaround or final
//! assembly without a stage-specific fill.

use chrono::{Datelike, NaiveDate};

/// A loan never reached the condition (ever flags, onset dates, provisional
/// monthly delinquency).
pub const NEVER_OBSERVED: i64 = -1;

/// Provisional `upb_12` when the reported balance is missing. Chosen to be
/// far above any real balance so it never wins a MIN aggregation.
pub const UNKNOWN_BALANCE: f64 = 999_999_999.0;

/// Epoch-millisecond value of the onset placeholder date (1970-01-01).
pub const FORWARD_FILL_PLACEHOLDER_MILLIS: i64 = 0;

/// Fill for numeric and category-code nulls in the null workaround and the
/// final assembly.
pub const MISSING_VALUE: i64 = -1;

const DAYS_FROM_CE_TO_UNIX_EPOCH: i64 = 719_163;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// Onset placeholder for a threshold the loan did not cross while crossing a
/// lower one.
pub fn forward_fill_placeholder() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("1970-01-01 is a valid date")
}

pub fn date_to_epoch_millis(date: NaiveDate) -> i64 {
    (i64::from(date.num_days_from_ce()) - DAYS_FROM_CE_TO_UNIX_EPOCH) * MILLIS_PER_DAY
}

/// Days since 1970-01-01, the physical value of a date column.
pub fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - DAYS_FROM_CE_TO_UNIX_EPOCH as i32
}

pub fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    days.checked_add(DAYS_FROM_CE_TO_UNIX_EPOCH as i32)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
}
