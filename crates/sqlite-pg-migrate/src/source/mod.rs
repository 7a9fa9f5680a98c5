//! SQLite source database operations.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::OpenFlags;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::identifier::quote_sqlite;
use crate::core::{
    Batch, ColumnDescriptor, ForeignKey, ReadOptions, Row, SourceReader, SqlValue,
};
use crate::error::{MigrateError, Result};

/// SQLite source over a single read-only connection.
pub struct SqliteSource {
    conn: Connection,
    path: String,
}

impl SqliteSource {
    /// Open the database file read-only and check it can be queried.
    pub async fn open(config: &SourceConfig) -> Result<Self> {
        if !Path::new(&config.path).is_file() {
            return Err(MigrateError::connection(
                format!("source {}", config.path),
                "database file not found",
            ));
        }

        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await
        .map_err(|e| MigrateError::connection(format!("source {}", config.path), e))?;

        let source = Self {
            conn,
            path: config.path.clone(),
        };
        source
            .ping()
            .await
            .map_err(|e| MigrateError::connection(format!("source {}", config.path), e))?;

        info!("Connected to SQLite: {}", config.path);
        Ok(source)
    }

    /// Path of the database file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run a query and collect every row as owned values.
    async fn query_rows(
        &self,
        sql: String,
        params: Vec<rusqlite::types::Value>,
        width: usize,
    ) -> Result<Vec<Row>> {
        debug!("SQLite query: {}", sql);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    (0..width)
                        .map(|i| row.get_ref(i).map(SqlValue::from_sqlite))
                        .collect::<rusqlite::Result<Row>>()
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<Row>>>()?)
            })
            .await?;
        Ok(rows)
    }
}

fn column_list(columns: &[String]) -> Result<String> {
    Ok(columns
        .iter()
        .map(|c| quote_sqlite(c))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// Bind a key value read from this database back into a query.
fn key_param(value: &SqlValue) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
        other => other
            .to_json()
            .map(|json| Value::Text(json.to_string()))
            .unwrap_or(Value::Null),
    }
}

#[async_trait]
impl SourceReader for SqliteSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
                     ORDER BY rowid",
                )?;
                let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
                Ok(names.collect::<rusqlite::Result<Vec<String>>>()?)
            })
            .await?;
        Ok(tables)
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let table = table.to_string();
        let columns = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, type, \"notnull\", dflt_value, pk \
                     FROM pragma_table_info(?1) ORDER BY cid",
                )?;
                let cols = stmt.query_map([&table], |row| {
                    let not_null: i64 = row.get(2)?;
                    let pk: i64 = row.get(4)?;
                    let pk_position = usize::try_from(pk).ok().filter(|p| *p > 0);
                    Ok(ColumnDescriptor {
                        name: row.get(0)?,
                        declared_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        nullable: not_null == 0,
                        pk_position,
                        default_value: row.get(3)?,
                    })
                })?;
                Ok(cols.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(columns)
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let table = table.to_string();
        let fks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT \"from\", \"table\", \"to\" \
                     FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
                )?;
                let fks = stmt.query_map([&table], |row| {
                    Ok(ForeignKey {
                        column: row.get(0)?,
                        ref_table: row.get(1)?,
                        ref_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    })
                })?;
                Ok(fks.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(fks)
    }

    async fn sample_rows(
        &self,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Row>> {
        if columns.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM {} LIMIT ?1",
            column_list(columns)?,
            quote_sqlite(table)?
        );
        self.query_rows(sql, vec![(limit as i64).into()], columns.len())
            .await
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_sqlite(table)?);
        let count = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(count)
    }

    async fn read_batch(&self, opts: &ReadOptions) -> Result<Batch> {
        let keys = if opts.order_by.is_empty() {
            vec!["rowid".to_string()]
        } else {
            opts.order_by
                .iter()
                .map(|c| quote_sqlite(c))
                .collect::<Result<Vec<_>>>()?
        };
        let key_list = keys.join(", ");

        let mut params: Vec<rusqlite::types::Value> = vec![(opts.limit as i64).into()];
        let (filter, page) = match &opts.cursor.last_key {
            _ if opts.cursor.by_offset() => {
                params.push((opts.cursor.rows_read as i64).into());
                (String::new(), " OFFSET ?2")
            }
            Some(last) => {
                let placeholders: Vec<String> =
                    (0..last.len()).map(|i| format!("?{}", i + 2)).collect();
                params.extend(last.iter().map(key_param));
                let filter = if keys.len() == 1 {
                    format!(" WHERE {} > {}", key_list, placeholders.join(", "))
                } else {
                    format!(" WHERE ({}) > ({})", key_list, placeholders.join(", "))
                };
                (filter, "")
            }
            None => (String::new(), ""),
        };

        let sql = format!(
            "SELECT {}, {} FROM {}{} ORDER BY {} LIMIT ?1{}",
            column_list(&opts.columns)?,
            key_list,
            quote_sqlite(&opts.table)?,
            filter,
            key_list,
            page
        );
        let width = opts.columns.len();
        let mut rows = self.query_rows(sql, params, width + keys.len()).await?;

        // Non-UTF-8 text reads back as a blob and would not compare equal.
        let last_key = rows
            .last()
            .map(|row| row[width..].to_vec())
            .filter(|key| !key.iter().any(|v| matches!(v, SqlValue::Blob(_))));
        for row in &mut rows {
            row.truncate(width);
        }
        let next = opts.cursor.advance(rows.len(), last_key);
        Ok(Batch { rows, next })
    }

    async fn ping(&self) -> Result<()> {
        self.conn
            .call(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }
}
