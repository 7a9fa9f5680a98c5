//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};
use crate::typemap::TypeMapper;

const SSL_MODES: &[&str] = &["disable", "require", "verify-ca", "verify-full"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.path.trim().is_empty() {
        return Err(MigrateError::Config("source.path is required".into()));
    }

    // Target validation
    match &config.target.url {
        Some(url) => {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(MigrateError::Config(
                    "target.url must start with postgres:// or postgresql://".into(),
                ));
            }
        }
        None => {
            if config.target.host.is_empty() {
                return Err(MigrateError::Config("target.host is required".into()));
            }
            if config.target.database.is_empty() {
                return Err(MigrateError::Config("target.database is required".into()));
            }
            if config.target.user.is_empty() {
                return Err(MigrateError::Config("target.user is required".into()));
            }
        }
    }
    validate_identifier(&config.target.schema)
        .map_err(|e| MigrateError::Config(format!("target.schema: {}", e)))?;
    if !SSL_MODES.contains(&config.target.ssl_mode.as_str()) {
        return Err(MigrateError::Config(format!(
            "target.ssl_mode must be one of {}, got '{}'",
            SSL_MODES.join(", "),
            config.target.ssl_mode
        )));
    }

    // Migration config validation
    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.max_pg_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_pg_connections must be at least 1".into(),
        ));
    }
    let separator = &migration.collision_separator;
    if separator.is_empty()
        || !separator
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(MigrateError::Config(format!(
            "migration.collision_separator must be non-empty and use only [a-z0-9_], got '{}'",
            separator
        )));
    }
    TypeMapper::with_overrides(&migration.column_types)?;

    Ok(())
}
