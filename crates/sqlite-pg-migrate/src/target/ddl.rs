//! SQL text generation for the PostgreSQL target.
//!
//! Every identifier reaching these builders is either quoted here or was
//! produced by the identifier sanitizer.

use crate::coerce::Coercer;
use crate::core::identifier::qualify_pg;
use crate::core::{SqlValue, TableDescriptor, TargetType};
use crate::error::Result;

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Rows that fit in one multi-row INSERT for the given column count.
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Build the `CREATE TABLE` statement for a planned table.
pub fn create_table_sql(schema: &str, table: &TableDescriptor) -> Result<String> {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|(_, spec)| {
            let mut line = format!("    {} {}", spec.sanitized_name, spec.target_type.pg_type());
            if spec.identity {
                line.push_str(" GENERATED BY DEFAULT AS IDENTITY");
            } else if let Some(default) = &spec.default_expr {
                line.push_str(" DEFAULT ");
                line.push_str(default);
            }
            if !spec.nullable {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    let mut pk: Vec<(usize, &str)> = table
        .columns
        .iter()
        .filter_map(|(col, spec)| col.pk_position.map(|p| (p, spec.sanitized_name.as_str())))
        .collect();
    pk.sort_by_key(|(pos, _)| *pos);
    if !pk.is_empty() {
        let names: Vec<&str> = pk.into_iter().map(|(_, name)| name).collect();
        lines.push(format!("    PRIMARY KEY ({})", names.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} (\n{}\n)",
        qualify_pg(schema, &table.sanitized_name)?,
        lines.join(",\n")
    ))
}

/// Build a multi-row INSERT with numbered placeholders.
pub fn insert_sql(qualified_table: &str, columns: &[String], rows: usize) -> String {
    let width = columns.len();
    let values: Vec<String> = (0..rows)
        .map(|r| {
            let placeholders: Vec<String> =
                (1..=width).map(|c| format!("${}", r * width + c)).collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        columns.join(", "),
        values.join(", ")
    )
}

/// Statement advancing an identity sequence past the largest loaded value.
///
/// Binds `$1` = qualified table, `$2` = resolved column name.
pub fn reset_identity_sql(qualified_table: &str, sanitized_column: &str) -> String {
    format!(
        "SELECT setval(pg_get_serial_sequence($1, $2), GREATEST(COALESCE((SELECT MAX({}) FROM {}), 0), 0) + 1, false)",
        sanitized_column, qualified_table
    )
}

/// Translate a SQLite column default into a PostgreSQL default expression.
///
/// Handles literals, `NULL`, `TRUE`/`FALSE` and the `CURRENT_*` keywords.
/// Returns `None` for anything else, or when the literal does not fit the
/// target type.
pub fn translate_default(sqlite_default: &str, target: &TargetType) -> Option<String> {
    let mut expr = sqlite_default.trim();
    while expr.starts_with('(') && expr.ends_with(')') && expr.len() >= 2 {
        expr = expr[1..expr.len() - 1].trim();
    }

    match (expr.to_uppercase().as_str(), target) {
        ("NULL", _) => return Some("NULL".to_string()),
        ("CURRENT_TIMESTAMP", TargetType::Timestamp) => {
            return Some("(now() AT TIME ZONE 'utc')".to_string())
        }
        ("CURRENT_DATE", TargetType::Timestamp) => return Some("CURRENT_DATE".to_string()),
        ("CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME", _) => return None,
        _ => {}
    }

    let literal = parse_literal(expr)?;
    let value = Coercer::default().coerce(&literal, target).ok()?;
    render_literal(&value)
}

fn parse_literal(expr: &str) -> Option<SqlValue> {
    if expr.len() >= 2 && expr.starts_with('\'') && expr.ends_with('\'') {
        let inner = &expr[1..expr.len() - 1];
        // A lone quote inside means this is not a single literal.
        if inner.replace("''", "").contains('\'') {
            return None;
        }
        return Some(SqlValue::Text(inner.replace("''", "'")));
    }
    match expr.to_uppercase().as_str() {
        "TRUE" => return Some(SqlValue::Bool(true)),
        "FALSE" => return Some(SqlValue::Bool(false)),
        _ => {}
    }
    if let Ok(i) = expr.parse::<i64>() {
        return Some(SqlValue::Integer(i));
    }
    expr.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(SqlValue::Real)
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn render_literal(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => Some("NULL".to_string()),
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(format!("{:?}", f)),
        SqlValue::Text(s) => Some(quote_literal(s)),
        SqlValue::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        SqlValue::Timestamp(ts) => Some(format!(
            "{}::timestamp",
            quote_literal(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        )),
        SqlValue::Json(v) => Some(format!("{}::jsonb", quote_literal(&v.to_string()))),
        SqlValue::Blob(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            Some(format!("'\\x{}'::bytea", hex))
        }
        SqlValue::Array(items) if items.is_empty() => Some("'{}'".to_string()),
        SqlValue::Array(_) => None,
    }
}
