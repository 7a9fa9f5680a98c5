//! Type mapping from SQLite declared types to PostgreSQL column types.
//!
//! SQLite accepts any string as a column type, so the declared type alone is
//! not always enough. Columns whose declared type is missing or unknown are
//! typed from a bounded sample of their values.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::core::{ColumnDescriptor, SqlValue, TargetType};
use crate::error::{MigrateError, Result};

/// Which mapping rule produced a column's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingRule {
    /// Configured per-column override.
    Override,
    /// Untyped primary key whose sampled values are all integers.
    UntypedIntegerKey,
    /// Static declared-type table.
    Declared,
    /// Every sampled value is a JSON array.
    JsonArray,
    /// Every sampled value is a JSON object.
    JsonObject,
    /// Nothing else matched.
    Fallback,
}

impl fmt::Display for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MappingRule::Override => "override",
            MappingRule::UntypedIntegerKey => "untyped-integer-key",
            MappingRule::Declared => "declared",
            MappingRule::JsonArray => "json-array",
            MappingRule::JsonObject => "json-object",
            MappingRule::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// Normalize a declared type: uppercase, parameters such as `(255)` removed,
/// whitespace collapsed.
fn normalize_declared(declared: &str) -> String {
    let without_params = match declared.find('(') {
        Some(idx) => &declared[..idx],
        None => declared,
    };
    without_params
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Look up a declared type in the static table. Returns `None` when the type
/// is empty or not recognized.
pub fn lookup_declared_type(declared: &str) -> Option<TargetType> {
    let ty = match normalize_declared(declared).as_str() {
        // Integer
        "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "INT2" | "INT4"
        | "INT8" | "UNSIGNED BIG INT" => TargetType::Integer,

        // Floating point
        "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT4" | "FLOAT8" => {
            TargetType::Double
        }

        // Text
        "TEXT" | "VARCHAR" | "CHAR" | "NCHAR" | "NVARCHAR" | "CHARACTER" | "VARYING CHARACTER"
        | "CHARACTER VARYING" | "NATIVE CHARACTER" | "CLOB" => TargetType::Text,

        // Binary
        "BLOB" => TargetType::Bytea,

        // Boolean
        "BOOLEAN" | "BOOL" => TargetType::Boolean,

        // Date/time
        "TIMESTAMP" | "DATETIME" | "DATE" => TargetType::Timestamp,

        // JSON
        "JSON" | "JSONB" => TargetType::Jsonb,

        _ => return None,
    };
    Some(ty)
}

/// Parse a sampled value as a JSON document, if it holds one.
fn as_json(value: &SqlValue) -> Option<serde_json::Value> {
    match value {
        SqlValue::Json(v) => Some(v.clone()),
        SqlValue::Array(_) => value.to_json(),
        SqlValue::Text(s) => serde_json::from_str(s).ok(),
        SqlValue::Blob(b) => serde_json::from_slice(b).ok(),
        _ => None,
    }
}

/// Element type for a JSON value found inside an array.
fn element_type(value: &serde_json::Value) -> Option<TargetType> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(_) => Some(TargetType::Boolean),
        serde_json::Value::Number(n) if n.is_i64() => Some(TargetType::Integer),
        serde_json::Value::Number(_) => Some(TargetType::Double),
        serde_json::Value::String(_) => Some(TargetType::Text),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Some(TargetType::Jsonb),
    }
}

/// Infer the element type of sampled arrays from their first non-null
/// element. Mixed element kinds, or no elements at all, give `Text`.
fn infer_element_type(arrays: &[Vec<serde_json::Value>]) -> TargetType {
    let mut kinds = arrays.iter().flatten().filter_map(element_type);
    let Some(first) = kinds.next() else {
        return TargetType::Text;
    };
    if kinds.all(|k| k == first) {
        first
    } else {
        TargetType::Text
    }
}

/// Map a column to a target type, reporting the rule that matched.
///
/// Rules in order, first match wins:
/// 1. untyped primary key with only integer-like sampled values: `Integer`
/// 2. declared type found in the static table
/// 3. every sampled value is a JSON array: array of the inferred element type
/// 4. every sampled value is a JSON object: `Jsonb`
/// 5. `Text`
///
/// NULLs in the sample are ignored; a sample with no non-NULL values never
/// satisfies rules 1, 3 or 4.
pub fn map_type_explained(
    declared_type: &str,
    samples: &[SqlValue],
    is_primary_key: bool,
) -> (TargetType, MappingRule) {
    let declared = lookup_declared_type(declared_type);
    let non_null: Vec<&SqlValue> = samples.iter().filter(|v| !v.is_null()).collect();

    if declared.is_none()
        && is_primary_key
        && !non_null.is_empty()
        && non_null.iter().all(|v| v.is_integer_like())
    {
        return (TargetType::Integer, MappingRule::UntypedIntegerKey);
    }

    if let Some(ty) = declared {
        return (ty, MappingRule::Declared);
    }

    if non_null.is_empty() {
        return (TargetType::Text, MappingRule::Fallback);
    }

    let parsed: Vec<Option<serde_json::Value>> = non_null.iter().map(|v| as_json(v)).collect();

    let arrays: Option<Vec<Vec<serde_json::Value>>> = parsed
        .iter()
        .map(|p| match p {
            Some(serde_json::Value::Array(items)) => Some(items.clone()),
            _ => None,
        })
        .collect();
    if let Some(arrays) = arrays {
        return (
            TargetType::array_of(infer_element_type(&arrays)),
            MappingRule::JsonArray,
        );
    }

    if parsed
        .iter()
        .all(|p| matches!(p, Some(serde_json::Value::Object(_))))
    {
        return (TargetType::Jsonb, MappingRule::JsonObject);
    }

    (TargetType::Text, MappingRule::Fallback)
}

/// Map a column to a target type. Never fails.
pub fn map_type(declared_type: &str, samples: &[SqlValue], is_primary_key: bool) -> TargetType {
    map_type_explained(declared_type, samples, is_primary_key).0
}

/// Type mapper with configured per-column overrides.
#[derive(Debug, Clone, Default)]
pub struct TypeMapper {
    overrides: HashMap<String, TargetType>,
}

impl TypeMapper {
    /// Create a mapper without overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mapper from configured overrides (column name to type name).
    ///
    /// Column names are matched case-insensitively.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self> {
        let overrides = overrides
            .iter()
            .map(|(column, ty)| {
                let parsed = ty.parse::<TargetType>().map_err(|_| {
                    MigrateError::Config(format!(
                        "column_types.{}: unknown target type '{}'",
                        column, ty
                    ))
                })?;
                Ok((column.to_lowercase(), parsed))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { overrides })
    }

    /// Whether the mapper needs sampled values to type this column.
    pub fn needs_sample(&self, column: &ColumnDescriptor) -> bool {
        !self.overrides.contains_key(&column.name.to_lowercase())
            && lookup_declared_type(&column.declared_type).is_none()
    }

    /// Map one source column, given its sampled values.
    pub fn map_column(
        &self,
        table: &str,
        column: &ColumnDescriptor,
        samples: &[SqlValue],
    ) -> TargetType {
        let (ty, rule) = match self.overrides.get(&column.name.to_lowercase()) {
            Some(ty) => (ty.clone(), MappingRule::Override),
            None => map_type_explained(&column.declared_type, samples, column.is_primary_key()),
        };

        debug!(
            "{}.{}: declared '{}' -> {} ({}, {} samples)",
            table,
            column.name,
            column.declared_type,
            ty,
            rule,
            samples.len()
        );
        ty
    }
}
