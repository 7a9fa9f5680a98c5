//! Target table creation.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::{TableDescriptor, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::target::create_table_sql;

/// Creates planned tables in the target schema.
pub struct SchemaBuilder {
    target: Arc<dyn TargetWriter>,
    schema: String,
}

impl SchemaBuilder {
    pub fn new(target: Arc<dyn TargetWriter>, schema: impl Into<String>) -> Self {
        Self {
            target,
            schema: schema.into(),
        }
    }

    /// The `CREATE TABLE` statement for a planned table.
    pub fn ddl(&self, table: &TableDescriptor) -> Result<String> {
        create_table_sql(&self.schema, table)
    }

    /// Create the table unless it already exists.
    ///
    /// Returns `true` when the table was created. An existing table is left
    /// untouched, whatever its definition.
    pub async fn ensure_table(&self, table: &TableDescriptor) -> Result<bool> {
        if self.target.table_exists(&table.sanitized_name).await? {
            debug!("{}: target table already exists", table.source_name);
            return Ok(false);
        }

        let sql = self.ddl(table)?;
        debug!("{}: {}", table.source_name, sql);
        self.target
            .execute_ddl(&sql)
            .await
            .map_err(|e| MigrateError::schema_creation(&table.source_name, e))?;

        info!(
            "Created table {}.{} ({} columns)",
            self.schema,
            table.sanitized_name,
            table.columns.len()
        );
        Ok(true)
    }
}
