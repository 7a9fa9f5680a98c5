//! SQL value types moved between the source and the target.
//!
//! One owned enum covers both sides of the migration. Values read from SQLite
//! only ever use the storage classes SQLite knows about (`Null`, `Integer`,
//! `Real`, `Text`, `Blob`); coercion produces the richer variants the target
//! columns need (`Bool`, `Timestamp`, `Json`, `Array`).

use std::fmt;

use chrono::NaiveDateTime;
use rusqlite::types::ValueRef;

/// Longest rendering of a value kept in error messages and logs.
const DISPLAY_LIMIT: usize = 120;

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// 64-bit signed integer (SQLite INTEGER storage class).
    Integer(i64),

    /// 64-bit floating point (SQLite REAL storage class).
    Real(f64),

    /// UTF-8 text.
    Text(String),

    /// Raw binary payload.
    Blob(Vec<u8>),

    /// Boolean.
    Bool(bool),

    /// Timestamp without time zone (UTC).
    Timestamp(NaiveDateTime),

    /// Parsed JSON document.
    Json(serde_json::Value),

    /// Array whose elements share one element type.
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the variant, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
            SqlValue::Bool(_) => "bool",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Json(_) => "json",
            SqlValue::Array(_) => "array",
        }
    }

    /// Convert a borrowed SQLite value into an owned value.
    ///
    /// Text that is not valid UTF-8 is kept as a blob rather than being
    /// repaired, so no bytes are lost on the way through.
    pub fn from_sqlite(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => SqlValue::Text(s.to_string()),
                Err(_) => SqlValue::Blob(bytes.to_vec()),
            },
            ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
        }
    }

    /// Build a value from a parsed JSON node.
    ///
    /// Scalars become the matching scalar variant; nested objects and arrays
    /// stay JSON.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            },
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Json(other.clone()),
        }
    }

    /// Convert to a JSON node. Returns `None` for values JSON cannot hold
    /// (binary data, non-finite floats).
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            SqlValue::Null => Some(serde_json::Value::Null),
            SqlValue::Integer(i) => Some(serde_json::Value::from(*i)),
            SqlValue::Real(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            SqlValue::Text(s) => Some(serde_json::Value::String(s.clone())),
            SqlValue::Blob(_) => None,
            SqlValue::Bool(b) => Some(serde_json::Value::Bool(*b)),
            SqlValue::Timestamp(ts) => Some(serde_json::Value::String(format_timestamp(ts))),
            SqlValue::Json(v) => Some(v.clone()),
            SqlValue::Array(items) => items
                .iter()
                .map(SqlValue::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
        }
    }

    /// Whether the value is an integer, or text holding one.
    pub fn is_integer_like(&self) -> bool {
        match self {
            SqlValue::Integer(_) => true,
            SqlValue::Text(s) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        }
    }
}

/// ISO-8601 rendering used when a timestamp has to become text.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(r) => r.to_string(),
            SqlValue::Text(s) => format!("{:?}", s),
            SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Timestamp(ts) => format_timestamp(ts),
            SqlValue::Json(v) => v.to_string(),
            SqlValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                format!("[{}]", parts.join(", "))
            }
        };

        if rendered.chars().count() > DISPLAY_LIMIT {
            let truncated: String = rendered.chars().take(DISPLAY_LIMIT).collect();
            write!(f, "{}...", truncated)
        } else {
            f.write_str(&rendered)
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
