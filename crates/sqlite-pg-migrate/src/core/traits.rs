//! Core traits for the migration engine.
//!
//! - [`SourceReader`]: reads schema and rows from the source database
//! - [`TargetWriter`]: inspects and creates tables in the target database
//! - [`TableLoad`]: one table's load, running inside a single target transaction
//!
//! The runner holds both ends as trait objects, so every component can be
//! exercised against in-memory doubles.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{ColumnDescriptor, ForeignKey, TableDescriptor, TargetType};
use super::value::SqlValue;

/// One row of values, in column order.
pub type Row = Vec<SqlValue>;

/// Options for reading one batch of rows from a table.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Source table name.
    pub table: String,
    /// Columns to read, in order.
    pub columns: Vec<String>,
    /// Columns to order and page by. Empty means storage (`rowid`) order.
    pub order_by: Vec<String>,
    /// Where the batch starts.
    pub cursor: Cursor,
    /// Maximum rows to return.
    pub limit: usize,
}

/// Position of a batch within a table.
///
/// Batches are paged by key (`WHERE key > last ORDER BY key`). A NULL key
/// cannot be compared, so once one is seen paging continues by offset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cursor {
    /// Paging key of the last row read, in `order_by` order.
    pub last_key: Option<Vec<SqlValue>>,
    /// Rows read so far.
    pub rows_read: u64,
}

impl Cursor {
    /// Whether the next batch must be located by offset.
    pub fn by_offset(&self) -> bool {
        self.last_key.is_none() && self.rows_read > 0
    }

    /// Cursor after `fetched` more rows ending at `last_key`.
    pub fn advance(&self, fetched: usize, last_key: Option<Vec<SqlValue>>) -> Cursor {
        if fetched == 0 {
            return self.clone();
        }
        let last_key = if self.by_offset() {
            None
        } else {
            last_key.filter(|key| !key.iter().any(SqlValue::is_null))
        };
        Cursor {
            last_key,
            rows_read: self.rows_read + fetched as u64,
        }
    }
}

/// Rows of one batch and the cursor of the batch after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub rows: Vec<Row>,
    pub next: Cursor,
}

/// Read schema and data from the source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// User table names in declaration order, internal tables excluded.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Column metadata in declaration order.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Foreign keys declared on a table.
    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>>;

    /// Up to `limit` rows of the given columns, in storage order.
    async fn sample_rows(&self, table: &str, columns: &[String], limit: usize)
        -> Result<Vec<Row>>;

    /// Get the row count for a table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Read one batch of rows. An empty batch means the table is exhausted.
    async fn read_batch(&self, opts: &ReadOptions) -> Result<Batch>;

    /// Round trip to the database, used by health checks.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}

/// Inspect and create tables in the target database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Create the target schema if it doesn't exist.
    async fn create_schema(&self) -> Result<()>;

    /// Check if a table exists. Takes the sanitized identifier.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Get the row count for a table. Takes the sanitized identifier.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Actual column types of an existing table, keyed by resolved column name.
    ///
    /// Types the migrator does not produce itself are left out.
    async fn existing_columns(&self, table: &str) -> Result<HashMap<String, TargetType>>;

    /// Run a DDL statement outside of any table load.
    async fn execute_ddl(&self, sql: &str) -> Result<()>;

    /// Start loading rows into a table.
    ///
    /// The returned guard owns one connection with an open transaction.
    async fn begin_load(&self, table: &TableDescriptor) -> Result<Box<dyn TableLoad>>;

    /// Round trip to the database, used by health checks.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}

/// Rows written through one transaction.
///
/// Dropping a load without calling [`TableLoad::commit`] discards every row
/// written through it.
#[async_trait]
pub trait TableLoad: Send {
    /// Write a batch of already coerced rows. Returns rows written.
    async fn insert_batch(&mut self, rows: Vec<Row>) -> Result<u64>;

    /// Finish the load and make the rows visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard everything written so far.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
