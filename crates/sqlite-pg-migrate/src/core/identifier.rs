//! Identifier validation, quoting and sanitization.
//!
//! SQL identifiers (table names, column names, schema names) cannot be passed
//! as parameters in prepared statements. Every identifier that reaches a
//! statement built by this crate goes through one of the functions below:
//!
//! - [`quote_pg`] / [`quote_sqlite`] always quote (used for catalog lookups
//!   and for reading from the source);
//! - [`sanitize`] quotes only when PostgreSQL requires it (reserved words,
//!   names that would be case-folded or are not plain identifiers);
//! - [`IdentifierSanitizer`] additionally keeps issued names distinct within
//!   one scope, so two source names never land on the same target name.

use std::collections::HashSet;

use crate::error::{MigrateError, Result};

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const PG_MAX_IDENTIFIER_BYTES: usize = 63;

/// Reserved key words of PostgreSQL, plus `index` which older tooling quoted.
pub const PG_RESERVED_WORDS: &[&str] = &[
    "all",
    "analyse",
    "analyze",
    "and",
    "any",
    "array",
    "as",
    "asc",
    "asymmetric",
    "authorization",
    "binary",
    "both",
    "case",
    "cast",
    "check",
    "collate",
    "collation",
    "column",
    "concurrently",
    "constraint",
    "create",
    "cross",
    "current_catalog",
    "current_date",
    "current_role",
    "current_schema",
    "current_time",
    "current_timestamp",
    "current_user",
    "default",
    "deferrable",
    "desc",
    "distinct",
    "do",
    "else",
    "end",
    "except",
    "false",
    "fetch",
    "for",
    "foreign",
    "freeze",
    "from",
    "full",
    "grant",
    "group",
    "having",
    "ilike",
    "in",
    "index",
    "initially",
    "inner",
    "intersect",
    "into",
    "is",
    "isnull",
    "join",
    "lateral",
    "leading",
    "left",
    "like",
    "limit",
    "localtime",
    "localtimestamp",
    "natural",
    "not",
    "notnull",
    "null",
    "offset",
    "on",
    "only",
    "or",
    "order",
    "outer",
    "overlaps",
    "placing",
    "primary",
    "references",
    "returning",
    "right",
    "select",
    "session_user",
    "similar",
    "some",
    "symmetric",
    "system_user",
    "table",
    "tablesample",
    "then",
    "to",
    "trailing",
    "true",
    "union",
    "unique",
    "user",
    "using",
    "variadic",
    "verbose",
    "when",
    "where",
    "window",
    "with",
];

/// Default reserved word set as owned strings.
pub fn default_reserved_words() -> Vec<String> {
    PG_RESERVED_WORDS.iter().map(|w| w.to_string()).collect()
}

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers and identifiers containing null bytes.
///
/// # Errors
///
/// Returns `MigrateError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(quote_unchecked(name))
}

/// Quote a SQLite identifier. SQLite uses the same double-quote rules.
pub fn quote_sqlite(name: &str) -> Result<String> {
    quote_pg(name)
}

/// Qualify an already sanitized PostgreSQL table identifier with a schema.
pub fn qualify_pg(schema: &str, sanitized_table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, sanitized_table))
}

fn quote_unchecked(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether `name` is a complete, well-formed double-quoted identifier.
fn is_quoted(name: &str) -> bool {
    if name.len() < 3 || !name.starts_with('"') || !name.ends_with('"') {
        return false;
    }
    let inner = &name[1..name.len() - 1];
    // Every embedded quote must be doubled.
    inner.split("\"\"").all(|part| !part.contains('"'))
}

fn is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Make a source identifier safe to use verbatim in PostgreSQL statements.
///
/// Reserved words (compared lowercase) and anything outside
/// `[a-z_][a-z0-9_]*` are double-quoted with their casing preserved; plain
/// lowercase names are returned unchanged. Already quoted identifiers pass
/// through untouched, so `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &str, reserved: &HashSet<String>) -> String {
    if is_quoted(raw) {
        return raw.to_string();
    }
    if reserved.contains(&raw.to_lowercase()) || !is_plain(raw) {
        return quote_unchecked(raw);
    }
    raw.to_string()
}

/// The name PostgreSQL will actually store for a sanitized identifier.
///
/// Quoted names keep their casing, unquoted names are folded to lowercase,
/// and both are truncated to [`PG_MAX_IDENTIFIER_BYTES`].
pub fn resolve_identifier(sanitized: &str) -> String {
    let resolved = if is_quoted(sanitized) {
        sanitized[1..sanitized.len() - 1].replace("\"\"", "\"")
    } else {
        sanitized.to_lowercase()
    };
    truncate_bytes(&resolved, PG_MAX_IDENTIFIER_BYTES).to_string()
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Issues sanitized identifiers that stay distinct within one scope.
///
/// One instance is used for all table names of a run, and a fresh instance
/// for the columns of each table.
#[derive(Debug, Clone)]
pub struct IdentifierSanitizer {
    reserved: HashSet<String>,
    separator: String,
    issued: HashSet<String>,
}

impl IdentifierSanitizer {
    /// Create a sanitizer over the given reserved words (any case).
    pub fn new<I, S>(reserved: I, separator: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            reserved: reserved
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
            separator: separator.into(),
            issued: HashSet::new(),
        }
    }

    /// Fresh sanitizer with the same reserved words and separator.
    pub fn fork(&self) -> Self {
        Self {
            reserved: self.reserved.clone(),
            separator: self.separator.clone(),
            issued: HashSet::new(),
        }
    }

    /// Sanitize without recording the result.
    pub fn sanitize(&self, raw: &str) -> String {
        sanitize(raw, &self.reserved)
    }

    /// Sanitize and record `raw`, suffixing `<sep>2`, `<sep>3`, ... until the
    /// resolved name is unused in this scope.
    pub fn issue(&mut self, raw: &str) -> Result<String> {
        validate_identifier(raw)?;

        let mut candidate = self.sanitize(raw);
        let mut n = 2u32;
        while self.issued.contains(&resolve_identifier(&candidate)) {
            let base = if is_quoted(raw) {
                resolve_identifier(raw)
            } else {
                raw.to_string()
            };
            let suffix = format!("{}{}", self.separator, n);
            let stem = truncate_bytes(&base, PG_MAX_IDENTIFIER_BYTES.saturating_sub(suffix.len()));
            candidate = self.sanitize(&format!("{}{}", stem, suffix));
            n += 1;
        }

        self.issued.insert(resolve_identifier(&candidate));
        Ok(candidate)
    }
}

impl Default for IdentifierSanitizer {
    fn default() -> Self {
        Self::new(PG_RESERVED_WORDS, "_")
    }
}
