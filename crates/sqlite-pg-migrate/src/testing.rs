//! In-memory source and target used by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::identifier::resolve_identifier;
use crate::core::{
    Batch, ColumnDescriptor, ForeignKey, ReadOptions, Row, SourceReader, SqlValue, TableDescriptor,
    TableLoad, TargetType, TargetWriter,
};
use crate::error::{MigrateError, Result};

/// Column descriptor shorthand.
pub fn column(name: &str, declared_type: &str, pk_position: Option<usize>) -> ColumnDescriptor {
    // SQLite reports key columns as nullable unless declared NOT NULL
    ColumnDescriptor {
        name: name.to_string(),
        declared_type: declared_type.to_string(),
        nullable: true,
        pk_position,
        default_value: None,
    }
}

/// A source table held in memory. Rows are stored in key order.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl MemoryTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn references(mut self, column: &str, ref_table: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            ref_table: ref_table.to_string(),
            ref_column: String::new(),
        });
        self
    }

    fn project(&self, row: &Row, columns: &[String]) -> Row {
        columns
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .position(|c| &c.name == name)
                    .and_then(|idx| row.get(idx).cloned())
                    .unwrap_or(SqlValue::Null)
            })
            .collect()
    }
}

/// Source reader over [`MemoryTable`]s, in declaration order.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: Vec<MemoryTable>,
    samples_taken: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: MemoryTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Tables that were sampled, in call order.
    pub fn samples_taken(&self) -> Vec<String> {
        self.samples_taken.lock().unwrap().clone()
    }

    fn find(&self, table: &str) -> Result<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| MigrateError::Config(format!("no such source table: {}", table)))
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.find(table)?.columns.clone())
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        Ok(self.find(table)?.foreign_keys.clone())
    }

    async fn sample_rows(
        &self,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Row>> {
        let t = self.find(table)?;
        self.samples_taken.lock().unwrap().push(table.to_string());
        Ok(t.rows.iter().take(limit).map(|r| t.project(r, columns)).collect())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self.find(table)?.rows.len() as i64)
    }

    async fn read_batch(&self, opts: &ReadOptions) -> Result<Batch> {
        let t = self.find(&opts.table)?;
        let rows: Vec<Row> = t
            .rows
            .iter()
            .skip(opts.cursor.rows_read as usize)
            .take(opts.limit)
            .map(|r| t.project(r, &opts.columns))
            .collect();
        let next = opts.cursor.advance(rows.len(), None);
        Ok(Batch { rows, next })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

/// A table stored by [`MemoryTarget`].
#[derive(Debug, Clone, Default)]
pub struct StoredTable {
    pub column_types: HashMap<String, TargetType>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct TargetState {
    tables: HashMap<String, StoredTable>,
    ddl: Vec<String>,
    rollbacks: usize,
    fail_ddl: Vec<String>,
    fail_commit: Vec<String>,
}

/// Target writer that keeps committed rows in memory.
///
/// Tables are keyed by resolved name. `CREATE TABLE` statements are recorded
/// and create an empty table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a table with the given column types and rows.
    pub fn with_table(self, name: &str, columns: &[(&str, TargetType)], rows: Vec<Row>) -> Self {
        let stored = StoredTable {
            column_types: columns
                .iter()
                .map(|(n, t)| (n.to_string(), t.clone()))
                .collect(),
            rows,
        };
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(resolve_identifier(name), stored);
        self
    }

    /// Reject `CREATE TABLE` for this resolved table name.
    pub fn fail_ddl_for(self, name: &str) -> Self {
        self.state.lock().unwrap().fail_ddl.push(name.to_string());
        self
    }

    /// Reject the commit of loads into this resolved table name.
    pub fn fail_commit_for(self, name: &str) -> Self {
        self.state.lock().unwrap().fail_commit.push(name.to_string());
        self
    }

    pub fn rows(&self, name: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(name)
    }

    pub fn ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().ddl.clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

/// Resolved table name from `CREATE TABLE "schema".name (`.
fn created_table_name(sql: &str) -> Option<String> {
    let rest = sql.strip_prefix("CREATE TABLE ")?;
    let qualified = &rest[..rest.find(" (")?];
    let dot = qualified.find("\".")?;
    Some(resolve_identifier(&qualified[dot + 2..]))
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn create_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.has_table(&resolve_identifier(table)))
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&resolve_identifier(table))
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| MigrateError::Config(format!("no such target table: {}", table)))
    }

    async fn existing_columns(&self, table: &str) -> Result<HashMap<String, TargetType>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tables
            .get(&resolve_identifier(table))
            .map(|t| t.column_types.clone())
            .unwrap_or_default())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(name) = created_table_name(sql) {
            if state.fail_ddl.contains(&name) {
                return Err(MigrateError::Config(format!("relation {} rejected", name)));
            }
            state.tables.entry(name).or_default();
        }
        state.ddl.push(sql.to_string());
        Ok(())
    }

    async fn begin_load(&self, table: &TableDescriptor) -> Result<Box<dyn TableLoad>> {
        Ok(Box::new(MemoryLoad {
            state: Arc::clone(&self.state),
            table: resolve_identifier(&table.sanitized_name),
            staged: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

struct MemoryLoad {
    state: Arc<Mutex<TargetState>>,
    table: String,
    staged: Vec<Row>,
}

#[async_trait]
impl TableLoad for MemoryLoad {
    async fn insert_batch(&mut self, rows: Vec<Row>) -> Result<u64> {
        let n = rows.len() as u64;
        self.staged.extend(rows);
        Ok(n)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commit.contains(&self.table) {
            state.rollbacks += 1;
            return Err(MigrateError::commit(&self.table, "could not serialize access"));
        }
        let staged = self.staged.clone();
        state
            .tables
            .entry(self.table.clone())
            .or_default()
            .rows
            .extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}
