//! Per-table data transfer.
//!
//! A table moves through [`TableState`]s on its way from the source to the
//! target. Every row of a table is written inside one target transaction, so
//! a table is either fully committed or left without any migrated rows.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::coerce::{Coercer, CoercionError};
use crate::core::identifier::resolve_identifier;
use crate::core::{
    Cursor, ReadOptions, SourceReader, TableDescriptor, TableLoad, TargetType, TargetWriter,
};
use crate::error::{MigrateError, Result};
use crate::schema::SchemaBuilder;

/// Lifecycle of one table's migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    Pending,
    CheckingExisting,
    Skipped,
    CreatingSchema,
    Streaming,
    Committing,
    Done,
    Failed,
}

impl TableState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TableState::Skipped | TableState::Done | TableState::Failed)
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(self, next: TableState) -> bool {
        use TableState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Pending, CheckingExisting) => true,
            (CheckingExisting, Skipped | CreatingSchema) => true,
            (CreatingSchema, Streaming) => true,
            (Streaming, Committing) => true,
            (Committing, Done) => true,
            _ => false,
        }
    }
}

/// Final status of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Migrated,
    SkippedNonempty,
    Failed,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Migrated => "migrated",
            TableStatus::SkippedNonempty => "skipped_nonempty",
            TableStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of migrating one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Source table name.
    pub table_name: String,

    /// Sanitized target table identifier.
    pub target_name: String,

    pub status: TableStatus,

    /// Rows committed to the target (0 unless migrated).
    pub rows_migrated: u64,

    /// Error message when the table failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl MigrationResult {
    /// Result for a table that failed before or during its migration.
    pub fn failed(table: &TableDescriptor, error: &MigrateError, duration_ms: u64) -> Self {
        Self {
            table_name: table.source_name.clone(),
            target_name: table.sanitized_name.clone(),
            status: TableStatus::Failed,
            rows_migrated: 0,
            error: Some(error.to_string()),
            duration_ms,
        }
    }
}

/// Transfer settings.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Rows per source read and target insert.
    pub batch_size: usize,

    /// Split comma-separated text into arrays.
    pub delimited_arrays: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            delimited_arrays: false,
        }
    }
}

/// Tracks the state of one table and rejects illegal transitions.
struct Progress<'a> {
    table: &'a str,
    state: TableState,
}

impl<'a> Progress<'a> {
    fn new(table: &'a str) -> Self {
        Self {
            table,
            state: TableState::Pending,
        }
    }

    fn advance(&mut self, next: TableState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(MigrateError::Config(format!(
                "{}: illegal state transition {:?} -> {:?}",
                self.table, self.state, next
            )));
        }
        debug!("{}: {:?} -> {:?}", self.table, self.state, next);
        self.state = next;
        Ok(())
    }
}

enum Outcome {
    Skipped { existing_rows: i64 },
    Migrated { rows: u64 },
}

/// Migrates single tables from the source to the target.
pub struct TableMigrator {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    builder: SchemaBuilder,
    coercer: Coercer,
    batch_size: usize,
}

impl TableMigrator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        schema: impl Into<String>,
        config: TransferConfig,
    ) -> Self {
        let builder = SchemaBuilder::new(target.clone(), schema);
        Self {
            source,
            target,
            builder,
            coercer: Coercer::new(config.delimited_arrays),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Migrate one table. Never returns an error: failures are reported in
    /// the result with status [`TableStatus::Failed`].
    pub async fn migrate(&self, table: &TableDescriptor) -> MigrationResult {
        let started = Instant::now();
        let mut progress = Progress::new(&table.source_name);

        let outcome = self.run(table, &mut progress).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Outcome::Skipped { existing_rows }) => {
                info!(
                    "{}: skipped, target {} already holds {} rows",
                    table.source_name, table.sanitized_name, existing_rows
                );
                MigrationResult {
                    table_name: table.source_name.clone(),
                    target_name: table.sanitized_name.clone(),
                    status: TableStatus::SkippedNonempty,
                    rows_migrated: 0,
                    error: None,
                    duration_ms,
                }
            }
            Ok(Outcome::Migrated { rows }) => {
                info!(
                    "{}: migrated {} rows into {} in {}ms",
                    table.source_name, rows, table.sanitized_name, duration_ms
                );
                MigrationResult {
                    table_name: table.source_name.clone(),
                    target_name: table.sanitized_name.clone(),
                    status: TableStatus::Migrated,
                    rows_migrated: rows,
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                if let Err(te) = progress.advance(TableState::Failed) {
                    warn!("{}", te);
                }
                error!("{}: failed: {}", table.source_name, e);
                MigrationResult::failed(table, &e, duration_ms)
            }
        }
    }

    async fn run(&self, table: &TableDescriptor, progress: &mut Progress<'_>) -> Result<Outcome> {
        progress.advance(TableState::CheckingExisting)?;
        let exists = self.target.table_exists(&table.sanitized_name).await?;
        if exists {
            let existing_rows = self.target.row_count(&table.sanitized_name).await?;
            if existing_rows > 0 {
                progress.advance(TableState::Skipped)?;
                return Ok(Outcome::Skipped { existing_rows });
            }
        }

        progress.advance(TableState::CreatingSchema)?;
        let types = if exists {
            self.existing_types(table).await?
        } else {
            self.builder.ensure_table(table).await?;
            table.target_types()
        };

        progress.advance(TableState::Streaming)?;
        let mut load = self.target.begin_load(table).await?;
        let rows = match self.stream(table, &types, load.as_mut()).await {
            Ok(rows) => rows,
            Err(e) => {
                if let Err(rb) = load.rollback().await {
                    warn!("{}: rollback failed: {}", table.source_name, rb);
                }
                return Err(e);
            }
        };

        progress.advance(TableState::Committing)?;
        load.commit().await?;
        progress.advance(TableState::Done)?;
        Ok(Outcome::Migrated { rows })
    }

    /// Column types of an existing empty table, falling back to the planned
    /// type for columns whose target type is unknown.
    async fn existing_types(&self, table: &TableDescriptor) -> Result<Vec<TargetType>> {
        let existing = self.target.existing_columns(&table.sanitized_name).await?;
        Ok(table
            .columns
            .iter()
            .map(|(column, spec)| {
                match existing.get(&resolve_identifier(&spec.sanitized_name)) {
                    Some(actual) if *actual != spec.target_type => {
                        debug!(
                            "{}.{}: using existing target type {} instead of {}",
                            table.source_name, column.name, actual, spec.target_type
                        );
                        actual.clone()
                    }
                    _ => spec.target_type.clone(),
                }
            })
            .collect())
    }

    /// Read, coerce and insert every row. Returns rows written.
    async fn stream(
        &self,
        table: &TableDescriptor,
        types: &[TargetType],
        load: &mut dyn TableLoad,
    ) -> Result<u64> {
        let mut opts = ReadOptions {
            table: table.source_name.clone(),
            columns: table.source_columns(),
            order_by: table.primary_key(),
            cursor: Cursor::default(),
            limit: self.batch_size,
        };

        let mut written = 0u64;
        let mut row_number = 0u64;
        loop {
            let batch = self.source.read_batch(&opts).await?;
            let fetched = batch.rows.len();
            if fetched == 0 {
                break;
            }

            let mut coerced = Vec::with_capacity(fetched);
            for row in batch.rows {
                row_number += 1;
                if let Some(idx) = row
                    .iter()
                    .zip(&table.columns)
                    .position(|(value, (_, spec))| value.is_null() && !spec.nullable)
                {
                    return Err(MigrateError::Coercion {
                        table: table.source_name.clone(),
                        column: table.columns[idx].0.name.clone(),
                        row: row_number,
                        source: CoercionError::new(
                            "NULL",
                            types[idx].clone(),
                            "NULL in a NOT NULL column",
                        ),
                    });
                }
                let row = self.coercer.coerce_row(row, types).map_err(|(idx, source)| {
                    MigrateError::Coercion {
                        table: table.source_name.clone(),
                        column: table.columns[idx].0.name.clone(),
                        row: row_number,
                        source,
                    }
                })?;
                coerced.push(row);
            }

            written += load.insert_batch(coerced).await?;
            debug!(
                "{}: batch of {} rows ({} total)",
                table.source_name, fetched, written
            );

            opts.cursor = batch.next;
            if fetched < self.batch_size {
                break;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IdentifierSanitizer, SqlValue};
    use crate::schema::SchemaIntrospector;
    use crate::testing::{column, MemorySource, MemoryTable, MemoryTarget};
    use crate::typemap::TypeMapper;

    async fn plan(source: &Arc<MemorySource>, table: &str) -> TableDescriptor {
        let introspector = SchemaIntrospector::new(source.clone(), TypeMapper::new(), 50);
        introspector
            .plan_table(table, &mut IdentifierSanitizer::default())
            .await
            .unwrap()
    }

    fn migrator(source: &Arc<MemorySource>, target: &MemoryTarget, batch_size: usize) -> TableMigrator {
        TableMigrator::new(
            source.clone(),
            Arc::new(target.clone()),
            "public",
            TransferConfig {
                batch_size,
                delimited_arrays: false,
            },
        )
    }

    fn numbered(name: &str, n: i64, bad_row: Option<i64>) -> MemoryTable {
        let mut table = MemoryTable::new(name)
            .column(column("id", "INTEGER", Some(1)))
            .column(column("votes", "INTEGER", None));
        for i in 1..=n {
            let votes = if Some(i) == bad_row {
                SqlValue::Text("lots".into())
            } else {
                SqlValue::Integer(i * 10)
            };
            table = table.row(vec![SqlValue::Integer(i), votes]);
        }
        table
    }

    // =========================================================================
    // State machine tests
    // =========================================================================

    #[test]
    fn test_state_happy_path_transitions() {
        use TableState::*;
        let path = [Pending, CheckingExisting, CreatingSchema, Streaming, Committing, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
        assert!(CheckingExisting.can_transition_to(Skipped));
    }

    #[test]
    fn test_state_illegal_transitions() {
        use TableState::*;
        assert!(!Pending.can_transition_to(Streaming));
        assert!(!Streaming.can_transition_to(Done));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Skipped.can_transition_to(CreatingSchema));
        assert!(!Failed.can_transition_to(Pending));
        for s in [Pending, CheckingExisting, CreatingSchema, Streaming, Committing] {
            assert!(s.can_transition_to(Failed));
        }
    }

    // =========================================================================
    // Transfer tests
    // =========================================================================

    #[tokio::test]
    async fn test_migrate_new_table() {
        let source = Arc::new(MemorySource::new().table(
            MemoryTable::new("flag")
                .column(column("id", "INTEGER", Some(1)))
                .column(column("enabled", "BOOLEAN", None))
                .column(column("tags", "", None))
                .row(vec![1i64.into(), 1i64.into(), "[\"a\",\"b\"]".into()])
                .row(vec![2i64.into(), 0i64.into(), "[]".into()])
                .row(vec![3i64.into(), SqlValue::Null, SqlValue::Null]),
        ));
        let target = MemoryTarget::new();
        let table = plan(&source, "flag").await;

        let result = migrator(&source, &target, 2).migrate(&table).await;

        assert_eq!(result.status, TableStatus::Migrated);
        assert_eq!(result.rows_migrated, 3);
        assert!(result.error.is_none());
        let rows = target.rows("flag");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][1], SqlValue::Bool(true));
        assert_eq!(
            rows[0][2],
            SqlValue::Array(vec!["a".into(), "b".into()])
        );
        assert_eq!(rows[1][2], SqlValue::Array(vec![]));
        assert_eq!(rows[2][2], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_nonempty_target_is_skipped() {
        let source = Arc::new(MemorySource::new().table(numbered("post", 3, None)));
        let target = MemoryTarget::new().with_table(
            "post",
            &[("id", TargetType::Integer), ("votes", TargetType::Integer)],
            vec![vec![SqlValue::Integer(99), SqlValue::Integer(1)]],
        );
        let table = plan(&source, "post").await;

        let result = migrator(&source, &target, 500).migrate(&table).await;

        assert_eq!(result.status, TableStatus::SkippedNonempty);
        assert_eq!(result.rows_migrated, 0);
        assert_eq!(target.rows("post").len(), 1);
        assert!(target.ddl().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_skips_everything() {
        let source = Arc::new(MemorySource::new().table(numbered("post", 4, None)));
        let target = MemoryTarget::new();
        let table = plan(&source, "post").await;
        let migrator = migrator(&source, &target, 3);

        assert_eq!(migrator.migrate(&table).await.status, TableStatus::Migrated);
        let second = migrator.migrate(&table).await;
        assert_eq!(second.status, TableStatus::SkippedNonempty);
        assert_eq!(target.rows("post").len(), 4);
    }

    #[tokio::test]
    async fn test_coercion_failure_leaves_table_empty() {
        let source = Arc::new(MemorySource::new().table(numbered("post", 10, Some(5))));
        let target = MemoryTarget::new();
        let table = plan(&source, "post").await;

        let result = migrator(&source, &target, 2).migrate(&table).await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_migrated, 0);
        let message = result.error.unwrap();
        assert!(message.contains("post.votes"), "{}", message);
        assert!(message.contains("row 5"), "{}", message);
        assert!(target.has_table("post"));
        assert!(target.rows("post").is_empty());
        assert_eq!(target.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_null_primary_key_fails_table() {
        let source = Arc::new(
            MemorySource::new().table(
                MemoryTable::new("tag")
                    .column(column("name", "TEXT", Some(1)))
                    .column(column("n", "INTEGER", None))
                    .row(vec!["a".into(), 1i64.into()])
                    .row(vec![SqlValue::Null, 2i64.into()]),
            ),
        );
        let target = MemoryTarget::new();
        let table = plan(&source, "tag").await;

        let result = migrator(&source, &target, 500).migrate(&table).await;

        assert_eq!(result.status, TableStatus::Failed);
        let message = result.error.unwrap();
        assert!(message.contains("tag.name"), "{}", message);
        assert!(message.contains("row 2"), "{}", message);
        assert!(target.rows("tag").is_empty());
        assert_eq!(target.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported() {
        let source = Arc::new(MemorySource::new().table(numbered("post", 3, None)));
        let target = MemoryTarget::new().fail_commit_for("post");
        let table = plan(&source, "post").await;

        let result = migrator(&source, &target, 500).migrate(&table).await;

        assert_eq!(result.status, TableStatus::Failed);
        assert!(result.error.unwrap().contains("Commit failed"));
        assert!(target.rows("post").is_empty());
    }

    #[tokio::test]
    async fn test_schema_creation_failure_is_reported() {
        let source = Arc::new(MemorySource::new().table(numbered("post", 3, None)));
        let target = MemoryTarget::new().fail_ddl_for("post");
        let table = plan(&source, "post").await;

        let result = migrator(&source, &target, 500).migrate(&table).await;

        assert_eq!(result.status, TableStatus::Failed);
        assert!(result.error.unwrap().contains("Schema creation failed"));
    }

    #[tokio::test]
    async fn test_existing_empty_table_types_drive_coercion() {
        let source = Arc::new(MemorySource::new().table(numbered("post", 2, None)));
        let target = MemoryTarget::new().with_table(
            "post",
            &[("id", TargetType::Integer), ("votes", TargetType::Text)],
            vec![],
        );
        let table = plan(&source, "post").await;

        let result = migrator(&source, &target, 500).migrate(&table).await;

        assert_eq!(result.status, TableStatus::Migrated);
        assert!(target.ddl().is_empty());
        assert_eq!(target.rows("post")[0][1], SqlValue::Text("10".into()));
    }

    #[tokio::test]
    async fn test_exact_multiple_of_batch_size() {
        let source = Arc::new(MemorySource::new().table(numbered("post", 4, None)));
        let target = MemoryTarget::new();
        let table = plan(&source, "post").await;

        let result = migrator(&source, &target, 2).migrate(&table).await;

        assert_eq!(result.rows_migrated, 4);
        let ids: Vec<SqlValue> = target.rows("post").into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, (1..=4).map(SqlValue::Integer).collect::<Vec<_>>());
    }
}
