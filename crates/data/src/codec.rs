//! Column conversions shared by the repositories.
//!
//! Timestamps are stored as epoch milliseconds and decimals as text so that
//! comparisons in SQL stay exact.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

pub(crate) fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

pub(crate) fn decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).with_context(|| format!("invalid decimal column value '{text}'"))
}

pub(crate) fn opt_decimal(text: Option<String>) -> Result<Option<Decimal>> {
    text.as_deref().map(decimal).transpose()
}

pub(crate) fn quantity(raw: i64) -> Result<u32> {
    u32::try_from(raw).with_context(|| format!("invalid quantity {raw}"))
}
