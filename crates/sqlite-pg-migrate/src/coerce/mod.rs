//! Value coercion from source storage classes to target column types.
//!
//! Only lossless conversions are performed. Anything that would silently
//! change a value (a fractional real into an integer, text that is not a
//! number, bytes that are not UTF-8) is rejected with a [`CoercionError`],
//! which fails the whole table.
//!
//! Coercion is idempotent: coercing an already coerced value against the same
//! target type returns it unchanged.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::core::value::format_timestamp;
use crate::core::{SqlValue, TargetType};

/// Epoch numbers with a smaller magnitude are seconds, larger ones milliseconds.
pub const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Naive formats accepted for timestamps, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Formats with an explicit offset, normalized to UTC.
const OFFSET_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
];

/// A value that cannot be represented in its target column without loss.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {value} to {target}: {reason}")]
pub struct CoercionError {
    /// Rendering of the offending value (truncated).
    pub value: String,
    /// Target column type.
    pub target: TargetType,
    /// Why the conversion was refused.
    pub reason: String,
}

impl CoercionError {
    pub fn new(value: impl Into<String>, target: TargetType, reason: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            target,
            reason: reason.into(),
        }
    }

    fn of(value: &SqlValue, target: &TargetType, reason: impl Into<String>) -> Self {
        Self::new(value.to_string(), target.clone(), reason)
    }
}

/// Coerces source values to target column types.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coercer {
    /// Split text that is not a JSON array on commas when the target is an array.
    pub delimited_arrays: bool,
}

impl Coercer {
    pub fn new(delimited_arrays: bool) -> Self {
        Self { delimited_arrays }
    }

    /// Coerce every value of a row against the matching column type.
    ///
    /// Returns the index of the failing column alongside the error.
    pub fn coerce_row(
        &self,
        row: Vec<SqlValue>,
        types: &[TargetType],
    ) -> Result<Vec<SqlValue>, (usize, CoercionError)> {
        row.iter()
            .zip(types)
            .enumerate()
            .map(|(idx, (value, ty))| self.coerce(value, ty).map_err(|e| (idx, e)))
            .collect()
    }

    /// Coerce one value against a target type.
    pub fn coerce(&self, value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        match target {
            TargetType::Integer => to_integer(value, target),
            TargetType::Double => to_double(value, target),
            TargetType::Text => to_text(value, target),
            TargetType::Bytea => to_bytea(value, target),
            TargetType::Boolean => to_boolean(value, target),
            TargetType::Timestamp => to_timestamp(value, target),
            TargetType::Jsonb => to_jsonb(value, target),
            TargetType::ArrayOf(element) => self.to_array(value, target, element),
        }
    }

    fn to_array(
        &self,
        value: &SqlValue,
        target: &TargetType,
        element: &TargetType,
    ) -> Result<SqlValue, CoercionError> {
        let items: Vec<SqlValue> = match value {
            SqlValue::Array(items) => items.clone(),
            SqlValue::Json(serde_json::Value::Array(items)) => json_elements(items, element),
            SqlValue::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(serde_json::Value::Array(items)) => json_elements(&items, element),
                _ if self.delimited_arrays => split_delimited(s),
                _ => return Err(CoercionError::of(value, target, "text is not a JSON array")),
            },
            SqlValue::Blob(b) => match serde_json::from_slice::<serde_json::Value>(b) {
                Ok(serde_json::Value::Array(items)) => json_elements(&items, element),
                _ => return Err(CoercionError::of(value, target, "blob is not a JSON array")),
            },
            _ => {
                return Err(CoercionError::of(
                    value,
                    target,
                    format!("{} value is not an array", value.kind()),
                ))
            }
        };

        items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                self.coerce(item, element).map_err(|e| {
                    CoercionError::of(value, target, format!("element {}: {}", idx, e.reason))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SqlValue::Array)
    }
}

/// Coerce with default options.
pub fn coerce(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    Coercer::default().coerce(value, target)
}

fn json_elements(items: &[serde_json::Value], element: &TargetType) -> Vec<SqlValue> {
    items
        .iter()
        .map(|item| match (item, element) {
            (serde_json::Value::Null, _) => SqlValue::Null,
            (_, TargetType::Jsonb) => SqlValue::Json(item.clone()),
            _ => SqlValue::from_json(item),
        })
        .collect()
}

fn split_delimited(s: &str) -> Vec<SqlValue> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    s.split(',')
        .map(|part| SqlValue::Text(part.trim().to_string()))
        .collect()
}

fn to_integer(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    match value {
        SqlValue::Integer(i) => Ok(SqlValue::Integer(*i)),
        SqlValue::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        SqlValue::Real(f) => real_to_i64(*f)
            .map(SqlValue::Integer)
            .ok_or_else(|| CoercionError::of(value, target, "real is not an exact integer")),
        SqlValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| CoercionError::of(value, target, "text is not an integer")),
        _ => Err(CoercionError::of(
            value,
            target,
            format!("{} value has no integer form", value.kind()),
        )),
    }
}

fn real_to_i64(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT {
        Some(f as i64)
    } else {
        None
    }
}

fn to_double(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    match value {
        SqlValue::Real(f) => Ok(SqlValue::Real(*f)),
        SqlValue::Integer(i) => {
            let f = *i as f64;
            if real_to_i64(f) == Some(*i) {
                Ok(SqlValue::Real(f))
            } else {
                Err(CoercionError::of(
                    value,
                    target,
                    "integer is not exactly representable as a double",
                ))
            }
        }
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(SqlValue::Real)
            .map_err(|_| CoercionError::of(value, target, "text is not a number")),
        _ => Err(CoercionError::of(
            value,
            target,
            format!("{} value has no numeric form", value.kind()),
        )),
    }
}

fn to_text(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    let text = match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Timestamp(ts) => format_timestamp(ts),
        SqlValue::Json(v) => v.to_string(),
        SqlValue::Blob(b) => String::from_utf8(b.clone())
            .map_err(|_| CoercionError::of(value, target, "blob is not valid UTF-8"))?,
        SqlValue::Array(_) => value
            .to_json()
            .map(|v| v.to_string())
            .ok_or_else(|| CoercionError::of(value, target, "array has no text form"))?,
        SqlValue::Null => return Ok(SqlValue::Null),
    };
    Ok(SqlValue::Text(text))
}

fn to_bytea(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    match value {
        SqlValue::Blob(b) => Ok(SqlValue::Blob(b.clone())),
        SqlValue::Text(s) => Ok(SqlValue::Blob(s.as_bytes().to_vec())),
        _ => Err(CoercionError::of(
            value,
            target,
            format!("{} value has no binary form", value.kind()),
        )),
    }
}

fn to_boolean(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    match value {
        SqlValue::Bool(b) => Ok(SqlValue::Bool(*b)),
        SqlValue::Integer(0) => Ok(SqlValue::Bool(false)),
        SqlValue::Integer(1) => Ok(SqlValue::Bool(true)),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "0" | "false" => Ok(SqlValue::Bool(false)),
            "1" | "true" => Ok(SqlValue::Bool(true)),
            _ => Err(CoercionError::of(value, target, "not a boolean")),
        },
        _ => Err(CoercionError::of(value, target, "not a boolean")),
    }
}

fn to_timestamp(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    let parsed = match value {
        SqlValue::Timestamp(ts) => Some(*ts),
        SqlValue::Integer(i) => epoch_int_to_timestamp(*i),
        SqlValue::Real(f) => epoch_to_timestamp(*f),
        SqlValue::Text(s) => parse_timestamp(s.trim()),
        _ => None,
    };
    parsed
        .map(SqlValue::Timestamp)
        .ok_or_else(|| CoercionError::of(value, target, "not a recognised timestamp"))
}

/// Parse ISO-8601 text (or an epoch number written as text).
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(i) = s.parse::<i64>() {
        return epoch_int_to_timestamp(i);
    }
    s.parse::<f64>().ok().and_then(epoch_to_timestamp)
}

/// Integer epoch seconds or milliseconds, kept exact.
fn epoch_int_to_timestamp(n: i64) -> Option<NaiveDateTime> {
    let dt = if n.unsigned_abs() < EPOCH_MILLIS_THRESHOLD as u64 {
        DateTime::from_timestamp(n, 0)
    } else {
        DateTime::from_timestamp_millis(n)
    };
    dt.map(|dt| dt.naive_utc())
}

/// Epoch seconds or milliseconds, picked by magnitude.
fn epoch_to_timestamp(n: f64) -> Option<NaiveDateTime> {
    if !n.is_finite() {
        return None;
    }
    let seconds = if n.abs() < EPOCH_MILLIS_THRESHOLD as f64 {
        n
    } else {
        n / 1000.0
    };
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| dt.naive_utc())
}

fn to_jsonb(value: &SqlValue, target: &TargetType) -> Result<SqlValue, CoercionError> {
    match value {
        SqlValue::Json(v) => Ok(SqlValue::Json(v.clone())),
        SqlValue::Integer(_) | SqlValue::Real(_) | SqlValue::Bool(_) | SqlValue::Array(_) => value
            .to_json()
            .map(SqlValue::Json)
            .ok_or_else(|| CoercionError::of(value, target, "value has no JSON form")),
        SqlValue::Text(s) => serde_json::from_str(s)
            .map(SqlValue::Json)
            .map_err(|e| CoercionError::of(value, target, format!("invalid JSON: {}", e))),
        SqlValue::Blob(b) => serde_json::from_slice(b)
            .map(SqlValue::Json)
            .map_err(|e| CoercionError::of(value, target, format!("invalid JSON: {}", e))),
        _ => Err(CoercionError::of(
            value,
            target,
            format!("{} value has no JSON form", value.kind()),
        )),
    }
}
