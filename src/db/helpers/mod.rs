use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};

pub const MILLIS_PER_DAY: i64 = 86_400_000;

pub fn to_i32(value: i64, field: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| anyhow!("{field} contains out-of-range value {value}"))
}

pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

pub fn millis_to_naive_date(millis: i64) -> Option<NaiveDate> {
    millis_to_datetime(millis).map(|dt| dt.date_naive())
}

/// Floors an epoch-millis timestamp to the start of its UTC day, the form
/// `date_millis_since_epoch` is expected in. `None` for timestamps in the
/// partial day just above `i64::MIN`, whose day start does not fit in `i64`.
pub fn round_to_day(millis: i64) -> Option<i64> {
    millis.checked_sub(millis.rem_euclid(MILLIS_PER_DAY))
}
