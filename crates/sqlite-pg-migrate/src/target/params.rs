//! Binary parameter encoding of [`SqlValue`] for tokio-postgres.
//!
//! The server tells us each parameter's column type when the INSERT is
//! prepared, so values are encoded for that type rather than for the type the
//! mapper picked. Narrowing conversions are checked; a value that does not fit
//! is an error, never a truncation.

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};

use crate::core::value::format_timestamp;
use crate::core::SqlValue;

type EncodeResult = Result<IsNull, Box<dyn Error + Sync + Send>>;

fn unsupported(value: &SqlValue, ty: &Type) -> EncodeResult {
    Err(format!("cannot write {} value to a column of type {}", value.kind(), ty).into())
}

fn is_text(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME)
}

fn is_json(ty: &Type) -> bool {
    matches!(*ty, Type::JSON | Type::JSONB)
}

fn encode_integer(value: &SqlValue, i: i64, ty: &Type, out: &mut BytesMut) -> EncodeResult {
    match *ty {
        Type::INT8 => i.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::FLOAT8 => {
            let f = i as f64;
            if f as i64 != i || f >= 9_223_372_036_854_775_807.0 {
                return Err(format!("{} is not exactly representable as float8", i).into());
            }
            f.to_sql(ty, out)
        }
        Type::NUMERIC => Decimal::from(i).to_sql(ty, out),
        Type::BOOL if i == 0 || i == 1 => (i == 1).to_sql(ty, out),
        _ if is_text(ty) => i.to_string().to_sql(ty, out),
        _ if is_json(ty) => serde_json::Value::from(i).to_sql(ty, out),
        _ => unsupported(value, ty),
    }
}

fn encode_real(value: &SqlValue, f: f64, ty: &Type, out: &mut BytesMut) -> EncodeResult {
    match *ty {
        Type::FLOAT8 => f.to_sql(ty, out),
        Type::FLOAT4 => {
            let narrowed = f as f32;
            if f64::from(narrowed) != f && !f.is_nan() {
                return Err(format!("{} is not exactly representable as float4", f).into());
            }
            narrowed.to_sql(ty, out)
        }
        Type::NUMERIC => Decimal::try_from(f)?.to_sql(ty, out),
        _ if is_text(ty) => f.to_string().to_sql(ty, out),
        _ if is_json(ty) => match serde_json::Number::from_f64(f) {
            Some(n) => serde_json::Value::Number(n).to_sql(ty, out),
            None => unsupported(value, ty),
        },
        _ => unsupported(value, ty),
    }
}

fn encode_text(value: &SqlValue, s: &str, ty: &Type, out: &mut BytesMut) -> EncodeResult {
    match *ty {
        _ if is_text(ty) => s.to_sql(ty, out),
        _ if is_json(ty) => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
        Type::BYTEA => s.as_bytes().to_sql(ty, out),
        Type::NUMERIC => s.trim().parse::<Decimal>()?.to_sql(ty, out),
        _ => unsupported(value, ty),
    }
}

fn encode_timestamp(
    value: &SqlValue,
    ts: &chrono::NaiveDateTime,
    ty: &Type,
    out: &mut BytesMut,
) -> EncodeResult {
    match *ty {
        Type::TIMESTAMP => ts.to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::<Utc>::from_naive_utc_and_offset(*ts, Utc).to_sql(ty, out),
        Type::DATE if chrono::NaiveTime::from_hms_opt(0, 0, 0) == Some(ts.time()) => {
            ts.date().to_sql(ty, out)
        }
        _ if is_text(ty) => format_timestamp(ts).to_sql(ty, out),
        _ => unsupported(value, ty),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> EncodeResult {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Integer(i) => encode_integer(self, *i, ty, out),
            SqlValue::Real(f) => encode_real(self, *f, ty, out),
            SqlValue::Text(s) => encode_text(self, s, ty, out),
            SqlValue::Blob(b) => match *ty {
                Type::BYTEA => b.as_slice().to_sql(ty, out),
                _ => unsupported(self, ty),
            },
            SqlValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::INT2 => i16::from(*b).to_sql(ty, out),
                Type::INT4 => i32::from(*b).to_sql(ty, out),
                Type::INT8 => i64::from(*b).to_sql(ty, out),
                _ if is_text(ty) => b.to_string().to_sql(ty, out),
                _ if is_json(ty) => serde_json::Value::Bool(*b).to_sql(ty, out),
                _ => unsupported(self, ty),
            },
            SqlValue::Timestamp(ts) => encode_timestamp(self, ts, ty, out),
            SqlValue::Json(v) => match *ty {
                _ if is_json(ty) => v.to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => unsupported(self, ty),
            },
            SqlValue::Array(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ if is_json(ty) || is_text(ty) => match self.to_json() {
                    Some(json) if is_json(ty) => json.to_sql(ty, out),
                    Some(json) => json.to_string().to_sql(ty, out),
                    None => unsupported(self, ty),
                },
                _ => unsupported(self, ty),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &SqlValue, ty: &Type) -> Result<(IsNull, BytesMut), String> {
        let mut buf = BytesMut::new();
        value
            .to_sql(ty, &mut buf)
            .map(|is_null| (is_null, buf))
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_null_is_null_for_any_type() {
        for ty in [Type::INT8, Type::TEXT, Type::JSONB, Type::TEXT_ARRAY] {
            let (is_null, buf) = encode(&SqlValue::Null, &ty).unwrap();
            assert!(matches!(is_null, IsNull::Yes));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(encode(&SqlValue::Integer(7), &Type::INT8).unwrap().1.len(), 8);
        assert_eq!(encode(&SqlValue::Integer(7), &Type::INT4).unwrap().1.len(), 4);
        assert_eq!(encode(&SqlValue::Integer(7), &Type::INT2).unwrap().1.len(), 2);
    }

    #[test]
    fn test_integer_narrowing_checked() {
        assert!(encode(&SqlValue::Integer(70_000), &Type::INT2).is_err());
        assert!(encode(&SqlValue::Integer(i64::MAX), &Type::INT4).is_err());
        assert!(encode(&SqlValue::Integer(i64::MAX), &Type::FLOAT8).is_err());
    }

    #[test]
    fn test_real_into_float4_must_be_exact() {
        assert!(encode(&SqlValue::Real(0.5), &Type::FLOAT4).is_ok());
        assert!(encode(&SqlValue::Real(0.1), &Type::FLOAT4).is_err());
    }

    #[test]
    fn test_numeric_via_decimal() {
        assert!(encode(&SqlValue::Integer(12), &Type::NUMERIC).is_ok());
        assert!(encode(&SqlValue::Text("12.50".into()), &Type::NUMERIC).is_ok());
        assert!(encode(&SqlValue::Text("twelve".into()), &Type::NUMERIC).is_err());
    }

    #[test]
    fn test_jsonb_has_version_prefix() {
        let value = SqlValue::Json(serde_json::json!({"a": 1}));
        let (_, buf) = encode(&value, &Type::JSONB).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..], br#"{"a":1}"#);
    }

    #[test]
    fn test_text_into_json_column_is_parsed() {
        assert!(encode(&SqlValue::Text("[1,2]".into()), &Type::JSON).is_ok());
        assert!(encode(&SqlValue::Text("{oops".into()), &Type::JSON).is_err());
    }

    #[test]
    fn test_array_into_array_column() {
        let value = SqlValue::Array(vec![SqlValue::Text("a".into()), SqlValue::Null]);
        assert!(encode(&value, &Type::TEXT_ARRAY).is_ok());
        let empty = SqlValue::Array(vec![]);
        assert!(encode(&empty, &Type::INT8_ARRAY).is_ok());
    }

    #[test]
    fn test_array_into_scalar_column_is_error_not_panic() {
        let value = SqlValue::Array(vec![SqlValue::Integer(1)]);
        assert!(encode(&value, &Type::INT8).is_err());
        assert!(encode(&value, &Type::JSONB).is_ok());
    }

    #[test]
    fn test_timestamp_targets() {
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let value = SqlValue::Timestamp(ts);
        assert!(encode(&value, &Type::TIMESTAMP).is_ok());
        assert!(encode(&value, &Type::TIMESTAMPTZ).is_ok());
        assert!(encode(&value, &Type::DATE).is_ok());
        let with_time = SqlValue::Timestamp(ts + chrono::Duration::hours(3));
        assert!(encode(&with_time, &Type::DATE).is_err());
    }

    #[test]
    fn test_blob_only_into_bytea() {
        let value = SqlValue::Blob(vec![0xde, 0xad]);
        assert_eq!(encode(&value, &Type::BYTEA).unwrap().1.as_ref(), &[0xde, 0xad]);
        assert!(encode(&value, &Type::TEXT).is_err());
    }
}
