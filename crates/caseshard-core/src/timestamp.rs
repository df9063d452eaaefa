//! Timestamp normalization for the Opened/Closed/Updated lifecycle columns.
//!
//! Two policies exist. `Strict` is used on the raw extract, where a
//! malformed value aborts the operation. `Lenient` is used on the combined
//! table, where a malformed or missing value becomes null.

use chrono::{Datelike, NaiveDateTime};
use thiserror::Error;

/// Format of lifecycle timestamps in the raw extract.
pub const STRICT_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Format written into shards and read back by the metric stage.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lifecycle timestamp columns, in source order.
pub const TIMESTAMP_COLUMNS: [&str; 3] = [OPENED, CLOSED, UPDATED];
pub const OPENED: &str = "Opened";
pub const CLOSED: &str = "Closed";
pub const UPDATED: &str = "Updated";

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    Strict,
    Lenient,
}

impl TimestampPolicy {
    pub fn format(self) -> &'static str {
        match self {
            TimestampPolicy::Strict => STRICT_FORMAT,
            TimestampPolicy::Lenient => CANONICAL_FORMAT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{value}' does not match '{expected}'")]
pub struct TimestampError {
    pub value: String,
    pub expected: &'static str,
}

/// Parse `value` under `policy`.
///
/// Missing and blank values are `Ok(None)` under both policies. A value that
/// does not match the policy's format is an error under `Strict` and
/// `Ok(None)` under `Lenient`.
pub fn normalize(
    value: Option<&str>,
    policy: TimestampPolicy,
) -> Result<Option<NaiveDateTime>, TimestampError> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    match NaiveDateTime::parse_from_str(raw, policy.format()) {
        Ok(ts) => Ok(Some(ts)),
        Err(_) if policy == TimestampPolicy::Lenient => Ok(None),
        Err(_) => Err(TimestampError {
            value: raw.to_string(),
            expected: policy.format(),
        }),
    }
}

/// Serialize a timestamp in the canonical `YYYY-MM-DD hh:mm:ss` form.
pub fn to_canonical(ts: &NaiveDateTime) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Full English month name for a 1-based month number.
pub fn month_name(month: u32) -> Option<&'static str> {
    let index = usize::try_from(month).ok()?.checked_sub(1)?;
    MONTH_NAMES.get(index).copied()
}

/// Elapsed time from `start` to `end` in fractional days; negative when
/// `end` precedes `start`.
pub fn elapsed_days(start: &NaiveDateTime, end: &NaiveDateTime) -> f64 {
    end.signed_duration_since(*start).num_milliseconds() as f64 / 86_400_000.0
}

/// Calendar labels (month name, year) for an opened timestamp.
pub fn calendar_labels(opened: &NaiveDateTime) -> (Option<&'static str>, i32) {
    (month_name(opened.month()), opened.year())
}
