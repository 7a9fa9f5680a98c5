//! Source schema introspection and table planning.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{
    ColumnDescriptor, ForeignKey, IdentifierSanitizer, SourceReader, SqlValue, TableDescriptor,
    TargetColumnSpec, TargetType,
};
use crate::error::Result;
use crate::target::translate_default;
use crate::typemap::TypeMapper;

/// Reads source metadata and turns each table into a [`TableDescriptor`].
pub struct SchemaIntrospector {
    source: Arc<dyn SourceReader>,
    mapper: TypeMapper,
    sample_size: usize,
}

impl SchemaIntrospector {
    pub fn new(source: Arc<dyn SourceReader>, mapper: TypeMapper, sample_size: usize) -> Self {
        Self {
            source,
            mapper,
            sample_size,
        }
    }

    /// User tables in declaration order.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.source.list_tables().await
    }

    /// Columns of a table in declaration order.
    pub async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.source.describe_table(table).await
    }

    /// Foreign keys declared on a table.
    pub async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        self.source.foreign_keys(table).await
    }

    /// Sampled values per column, only for columns the mapper cannot type
    /// from the declaration alone. One query per table at most.
    async fn sample_columns(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Vec<Vec<SqlValue>>> {
        let mut samples = vec![Vec::new(); columns.len()];
        let wanted: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| self.mapper.needs_sample(c))
            .map(|(i, _)| i)
            .collect();
        if wanted.is_empty() || self.sample_size == 0 {
            return Ok(samples);
        }

        let names: Vec<String> = wanted.iter().map(|&i| columns[i].name.clone()).collect();
        let rows = self
            .source
            .sample_rows(table, &names, self.sample_size)
            .await?;
        debug!(
            "{}: sampled {} rows for {} untyped column(s)",
            table,
            rows.len(),
            names.len()
        );

        for row in rows {
            for (value, &idx) in row.into_iter().zip(&wanted) {
                samples[idx].push(value);
            }
        }
        Ok(samples)
    }

    /// Describe, sample and map one table.
    ///
    /// `tables` is the run-wide sanitizer for table names; columns get a
    /// fresh scope forked from it.
    pub async fn plan_table(
        &self,
        table: &str,
        tables: &mut IdentifierSanitizer,
    ) -> Result<TableDescriptor> {
        let columns = self.describe_table(table).await?;
        let samples = self.sample_columns(table, &columns).await?;
        let pk_columns = columns.iter().filter(|c| c.is_primary_key()).count();

        let sanitized_name = tables.issue(table)?;
        let mut column_names = tables.fork();

        let mut planned = Vec::with_capacity(columns.len());
        for (column, samples) in columns.into_iter().zip(samples) {
            let target_type = self.mapper.map_column(table, &column, &samples);
            let rowid_alias = pk_columns == 1
                && column.is_primary_key()
                && column.declared_type.eq_ignore_ascii_case("INTEGER");
            if column.is_primary_key() && column.nullable && !rowid_alias {
                warn!(
                    "{}.{}: primary key accepts NULL in SQLite, a NULL row will fail the table",
                    table, column.name
                );
            }

            let identity = pk_columns == 1
                && column.is_primary_key()
                && target_type == TargetType::Integer
                && column.default_value.is_none();

            let default_expr = match &column.default_value {
                Some(default) if !identity => {
                    let translated = translate_default(default, &target_type);
                    if translated.is_none() {
                        warn!(
                            "{}.{}: dropping default '{}' (no {} equivalent)",
                            table, column.name, default, target_type
                        );
                    }
                    translated
                }
                _ => None,
            };

            let spec = TargetColumnSpec {
                sanitized_name: column_names.issue(&column.name)?,
                target_type,
                nullable: column.nullable && !column.is_primary_key(),
                is_primary_key: column.is_primary_key(),
                identity,
                default_expr,
            };
            planned.push((column, spec));
        }

        let row_count_at_start = self.source.row_count(table).await?;

        Ok(TableDescriptor {
            source_name: table.to_string(),
            sanitized_name,
            columns: planned,
            row_count_at_start,
        })
    }
}
