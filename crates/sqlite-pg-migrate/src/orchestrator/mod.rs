//! Migration orchestrator - main workflow coordinator.

mod order;

pub use order::dependency_order;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::{IdentifierSanitizer, SourceReader, TargetType, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::schema::SchemaIntrospector;
use crate::source::SqliteSource;
use crate::target::PgTarget;
use crate::transfer::{MigrationResult, TableMigrator, TableStatus, TransferConfig};
use crate::typemap::TypeMapper;

/// Runs a whole migration, one table at a time.
pub struct MigrationRunner {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, failed or cancelled.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Tables attempted.
    pub tables_total: usize,

    /// Tables whose rows were migrated.
    pub tables_migrated: usize,

    /// Tables skipped because the target already held rows.
    pub tables_skipped: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Total rows migrated.
    pub rows_migrated: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Names of the failed tables.
    pub failed_tables: Vec<String>,

    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,

    /// Per-table results, in migration order.
    pub tables: Vec<MigrationResult>,
}

impl MigrationReport {
    fn new(
        run_id: String,
        started_at: DateTime<Utc>,
        tables: Vec<MigrationResult>,
        cancelled: bool,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let count = |status: TableStatus| tables.iter().filter(|r| r.status == status).count();
        let tables_migrated = count(TableStatus::Migrated);
        let tables_skipped = count(TableStatus::SkippedNonempty);
        let tables_failed = count(TableStatus::Failed);
        let failed_tables: Vec<String> = tables
            .iter()
            .filter(|r| r.status == TableStatus::Failed)
            .map(|r| r.table_name.clone())
            .collect();
        let rows_migrated: u64 = tables.iter().map(|r| r.rows_migrated).sum();

        let rows_per_second = if duration_seconds > 0.0 {
            (rows_migrated as f64 / duration_seconds) as u64
        } else {
            0
        };

        let status = if tables_failed > 0 {
            "failed"
        } else if cancelled {
            "cancelled"
        } else {
            "completed"
        };

        Self {
            run_id,
            status: status.to_string(),
            duration_seconds,
            started_at,
            completed_at,
            tables_total: tables.len(),
            tables_migrated,
            tables_skipped,
            tables_failed,
            rows_migrated,
            rows_per_second,
            failed_tables,
            cancelled,
            tables,
        }
    }

    /// Whether any table failed.
    pub fn has_failures(&self) -> bool {
        self.tables_failed > 0
    }

    /// The error the run should exit with, if any.
    ///
    /// Failed tables take precedence over cancellation.
    pub fn error(&self) -> Option<MigrateError> {
        if self.has_failures() {
            Some(MigrateError::TablesFailed(self.failed_tables.clone()))
        } else if self.cancelled {
            Some(MigrateError::Cancelled)
        } else {
            None
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A column as it will be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedColumn {
    pub name: String,
    pub declared_type: String,
    pub target_name: String,
    pub target_type: TargetType,
    pub nullable: bool,
    pub identity: bool,
}

/// A table as it will be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTable {
    pub table_name: String,
    pub target_name: String,
    pub row_count: i64,
    pub columns: Vec<PlannedColumn>,
    pub ddl: String,
}

/// Dry-run output: every selected table in migration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub schema: String,
    pub tables: Vec<PlannedTable>,
}

impl MigrationPlan {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Row count comparison for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub table_name: String,
    pub target_name: String,
    pub source_rows: i64,
    /// `None` when the target table does not exist.
    pub target_rows: Option<i64>,
    pub matches: bool,
}

/// Row count comparison for every selected table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tables: Vec<TableValidation>,
    pub mismatches: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.mismatches == 0
    }
}

/// Connectivity of both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Selected source tables, ordered so referenced tables come first.
async fn ordered_tables(config: &Config, source: &dyn SourceReader) -> Result<Vec<String>> {
    let mut selected = Vec::new();
    for table in source.list_tables().await? {
        if config.migration.is_table_selected(&table) {
            selected.push(table);
        } else {
            info!("Excluding table {}", table);
        }
    }

    let mut references = HashMap::with_capacity(selected.len());
    for table in &selected {
        match source.foreign_keys(table).await {
            Ok(fks) => {
                references.insert(
                    table.clone(),
                    fks.into_iter().map(|fk| fk.ref_table).collect::<Vec<_>>(),
                );
            }
            Err(e) => warn!("{}: could not read foreign keys, ordering as declared: {}", table, e),
        }
    }

    Ok(dependency_order(&selected, &references))
}

fn introspector(config: &Config, source: Arc<dyn SourceReader>) -> Result<SchemaIntrospector> {
    let mapper = TypeMapper::with_overrides(&config.migration.column_types)?;
    Ok(SchemaIntrospector::new(
        source,
        mapper,
        config.migration.sample_size,
    ))
}

fn table_sanitizer(config: &Config) -> IdentifierSanitizer {
    IdentifierSanitizer::new(
        &config.migration.reserved_words,
        config.migration.collision_separator.clone(),
    )
}

/// Plan every selected table without touching the target.
async fn build_plan(config: &Config, source: Arc<dyn SourceReader>) -> Result<MigrationPlan> {
    let tables = ordered_tables(config, source.as_ref()).await?;
    let introspector = introspector(config, source)?;
    let mut sanitizer = table_sanitizer(config);

    let mut planned = Vec::with_capacity(tables.len());
    for name in &tables {
        let table = introspector.plan_table(name, &mut sanitizer).await?;
        let ddl = crate::target::create_table_sql(&config.target.schema, &table)?;
        planned.push(PlannedTable {
            table_name: table.source_name.clone(),
            target_name: table.sanitized_name.clone(),
            row_count: table.row_count_at_start,
            columns: table
                .columns
                .iter()
                .map(|(c, t)| PlannedColumn {
                    name: c.name.clone(),
                    declared_type: c.declared_type.clone(),
                    target_name: t.sanitized_name.clone(),
                    target_type: t.target_type.clone(),
                    nullable: t.nullable,
                    identity: t.identity,
                })
                .collect(),
            ddl,
        });
    }

    Ok(MigrationPlan {
        schema: config.target.schema.clone(),
        tables: planned,
    })
}

impl MigrationRunner {
    /// Open the source and connect to the target.
    pub async fn connect(config: Config) -> Result<Self> {
        let source = SqliteSource::open(&config.source).await?;
        let target = PgTarget::connect(&config.target, config.migration.max_pg_connections).await?;
        Ok(Self::with_parts(config, Arc::new(source), Arc::new(target)))
    }

    /// Build a runner over already opened source and target.
    pub fn with_parts(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    /// Plan the migration from the source alone.
    pub async fn dry_run(config: &Config) -> Result<MigrationPlan> {
        let source = SqliteSource::open(&config.source).await?;
        build_plan(config, Arc::new(source)).await
    }

    /// Plan the migration without touching the target.
    pub async fn plan(&self) -> Result<MigrationPlan> {
        build_plan(&self.config, self.source.clone()).await
    }

    /// Run the migration.
    ///
    /// A failing table is recorded and the run continues with the next one.
    /// Cancellation is honoured between tables; the table in flight finishes.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        info!("Phase 1: Reading schema from {}", self.source.db_type());
        let tables = ordered_tables(&self.config, self.source.as_ref()).await?;
        info!("Found {} tables to migrate", tables.len());

        info!(
            "Phase 2: Preparing target schema {} ({})",
            self.config.target.schema,
            self.target.db_type()
        );
        self.target.create_schema().await?;

        info!("Phase 3: Migrating tables");
        let introspector = introspector(&self.config, self.source.clone())?;
        let migrator = TableMigrator::new(
            self.source.clone(),
            self.target.clone(),
            self.config.target.schema.clone(),
            TransferConfig {
                batch_size: self.config.migration.batch_size,
                delimited_arrays: self.config.migration.delimited_arrays,
            },
        );
        let mut sanitizer = table_sanitizer(&self.config);

        let mut results = Vec::with_capacity(tables.len());
        let mut cancelled = false;
        for (i, name) in tables.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "Cancellation requested, {} table(s) not attempted",
                    tables.len() - i
                );
                cancelled = true;
                break;
            }

            info!("[{}/{}] {}", i + 1, tables.len(), name);
            let started = Instant::now();
            let result = match introspector.plan_table(name, &mut sanitizer).await {
                Ok(table) => migrator.migrate(&table).await,
                Err(e) => {
                    error!("{}: could not plan table: {}", name, e);
                    MigrationResult {
                        table_name: name.clone(),
                        target_name: sanitizer.sanitize(name),
                        status: TableStatus::Failed,
                        rows_migrated: 0,
                        error: Some(e.to_string()),
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                }
            };
            results.push(result);
        }

        let report = MigrationReport::new(run_id, started_at, results, cancelled);
        info!(
            "Migration {}: {} tables ({} migrated, {} skipped, {} failed), {} rows in {:.1}s ({} rows/s)",
            report.status,
            report.tables_total,
            report.tables_migrated,
            report.tables_skipped,
            report.tables_failed,
            report.rows_migrated,
            report.duration_seconds,
            report.rows_per_second
        );
        Ok(report)
    }

    /// Compare source and target row counts of every selected table.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let tables = ordered_tables(&self.config, self.source.as_ref()).await?;
        let mut sanitizer = table_sanitizer(&self.config);

        let mut results = Vec::with_capacity(tables.len());
        for name in tables {
            let target_name = sanitizer.issue(&name)?;
            let source_rows = self.source.row_count(&name).await?;
            let target_rows = if self.target.table_exists(&target_name).await? {
                Some(self.target.row_count(&target_name).await?)
            } else {
                None
            };

            let matches = target_rows == Some(source_rows);
            match target_rows {
                Some(_) if matches => info!("{}: {} rows (match)", name, source_rows),
                Some(target) => warn!(
                    "{}: source={} target={} (MISMATCH)",
                    name, source_rows, target
                ),
                None => warn!("{}: target table {} missing", name, target_name),
            }

            results.push(TableValidation {
                table_name: name,
                target_name,
                source_rows,
                target_rows,
                matches,
            });
        }

        let mismatches = results.iter().filter(|r| !r.matches).count();
        Ok(ValidationReport {
            tables: results,
            mismatches,
        })
    }

    /// Check that both ends can be reached.
    pub async fn health_check(config: &Config) -> HealthCheckResult {
        let started = Instant::now();
        let source = match SqliteSource::open(&config.source).await {
            Ok(source) => source.ping().await,
            Err(e) => Err(e),
        };
        let source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let target = match PgTarget::connect(&config.target, 1).await {
            Ok(target) => target.ping().await,
            Err(e) => Err(e),
        };
        let target_latency_ms = started.elapsed().as_millis() as u64;

        HealthCheckResult {
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.as_ref().err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.as_ref().err().map(|e| e.to_string()),
            healthy: source.is_ok() && target.is_ok(),
        }
    }

    /// The configuration this runner was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
