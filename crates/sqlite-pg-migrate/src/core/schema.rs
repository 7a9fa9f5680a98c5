//! Schema and metadata types for source tables and their target counterparts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MigrateError;
use crate::typemap;

/// A source column as reported by the source database.
///
/// Read once per table by the introspector; never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as declared in the source.
    pub name: String,

    /// Declared type string. May be empty or non-standard.
    pub declared_type: String,

    /// Whether NULL is allowed.
    pub nullable: bool,

    /// Position within the primary key (1-based), `None` if not part of it.
    pub pk_position: Option<usize>,

    /// Default value expression as written in the source DDL.
    pub default_value: Option<String>,
}

impl ColumnDescriptor {
    /// Check if this column is part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.pk_position.is_some()
    }
}

/// Target column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TargetType {
    Integer,
    Double,
    Text,
    Bytea,
    Boolean,
    Timestamp,
    Jsonb,
    ArrayOf(Box<TargetType>),
}

impl TargetType {
    /// Build an array type over the given element type.
    pub fn array_of(element: TargetType) -> Self {
        TargetType::ArrayOf(Box::new(element))
    }

    /// PostgreSQL type name used in DDL.
    ///
    /// SQLite integers are 64-bit, so `Integer` is created as `BIGINT`.
    pub fn pg_type(&self) -> String {
        match self {
            TargetType::Integer => "BIGINT".to_string(),
            TargetType::Double => "DOUBLE PRECISION".to_string(),
            TargetType::Text => "TEXT".to_string(),
            TargetType::Bytea => "BYTEA".to_string(),
            TargetType::Boolean => "BOOLEAN".to_string(),
            TargetType::Timestamp => "TIMESTAMP".to_string(),
            TargetType::Jsonb => "JSONB".to_string(),
            TargetType::ArrayOf(inner) => format!("{}[]", inner.pg_type()),
        }
    }

    /// Check if this is an array type.
    pub fn is_array(&self) -> bool {
        matches!(self, TargetType::ArrayOf(_))
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Integer => f.write_str("INTEGER"),
            TargetType::Double => f.write_str("DOUBLE"),
            TargetType::Text => f.write_str("TEXT"),
            TargetType::Bytea => f.write_str("BYTEA"),
            TargetType::Boolean => f.write_str("BOOLEAN"),
            TargetType::Timestamp => f.write_str("TIMESTAMP"),
            TargetType::Jsonb => f.write_str("JSONB"),
            TargetType::ArrayOf(inner) => write!(f, "{}[]", inner),
        }
    }
}

impl FromStr for TargetType {
    type Err = MigrateError;

    /// Parse a type name such as `TEXT`, `bigint`, `JSONB` or `TEXT[]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(element) = trimmed.strip_suffix("[]") {
            let element: TargetType = element.parse()?;
            if element.is_array() {
                return Err(MigrateError::Config(format!(
                    "Nested array type '{}' is not supported",
                    s
                )));
            }
            return Ok(TargetType::array_of(element));
        }

        let upper = trimmed.to_uppercase();
        let known = match upper.as_str() {
            "BYTEA" => Some(TargetType::Bytea),
            "DOUBLE" | "FLOAT8" => Some(TargetType::Double),
            other => typemap::lookup_declared_type(other),
        };

        known.ok_or_else(|| MigrateError::Config(format!("Unknown target type '{}'", s)))
    }
}

impl From<TargetType> for String {
    fn from(t: TargetType) -> Self {
        t.to_string()
    }
}

impl TryFrom<String> for TargetType {
    type Error = MigrateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Target-side definition of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetColumnSpec {
    /// Sanitized (possibly quoted) identifier, usable verbatim in SQL.
    pub sanitized_name: String,

    /// Target type.
    pub target_type: TargetType,

    /// Whether NULL is allowed.
    pub nullable: bool,

    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,

    /// Whether the column is created as an identity column.
    pub identity: bool,

    /// Default expression in target syntax, if one could be carried over.
    pub default_expr: Option<String>,
}

/// Foreign key reference from one source table to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing column.
    pub column: String,

    /// Referenced table.
    pub ref_table: String,

    /// Referenced column (may be empty when the key points at the implicit PK).
    pub ref_column: String,
}

/// A source table paired with its target definition.
///
/// Owned by one migration pass over the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name in the source.
    pub source_name: String,

    /// Sanitized (possibly quoted) table identifier for the target.
    pub sanitized_name: String,

    /// Columns in source declaration order.
    pub columns: Vec<(ColumnDescriptor, TargetColumnSpec)>,

    /// Source row count when the table was described.
    pub row_count_at_start: i64,
}

impl TableDescriptor {
    /// Source column names in declaration order.
    pub fn source_columns(&self) -> Vec<String> {
        self.columns.iter().map(|(c, _)| c.name.clone()).collect()
    }

    /// Target column identifiers in declaration order.
    pub fn target_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|(_, t)| t.sanitized_name.clone())
            .collect()
    }

    /// Source primary key columns ordered by key position.
    pub fn primary_key(&self) -> Vec<String> {
        let mut pk: Vec<(usize, &str)> = self
            .columns
            .iter()
            .filter_map(|(c, _)| c.pk_position.map(|p| (p, c.name.as_str())))
            .collect();
        pk.sort_by_key(|(pos, _)| *pos);
        pk.into_iter().map(|(_, name)| name.to_string()).collect()
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        self.columns.iter().any(|(c, _)| c.is_primary_key())
    }

    /// The identity column, if one is created.
    pub fn identity_column(&self) -> Option<&TargetColumnSpec> {
        self.columns.iter().map(|(_, t)| t).find(|t| t.identity)
    }

    /// Target types in column order.
    pub fn target_types(&self) -> Vec<TargetType> {
        self.columns
            .iter()
            .map(|(_, t)| t.target_type.clone())
            .collect()
    }
}
