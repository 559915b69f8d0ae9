//! Configuration validation.

use super::{Config, WarehouseConfig, JSON_EACH_ROW_FORMATS};
use crate::error::{ReplicateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_endpoint("source", &config.source)?;
    validate_endpoint("destination", &config.destination)?;

    // Cannot replicate a database onto itself
    if config.source.host == config.destination.host
        && config.source.port == config.destination.port
        && config.source.database == config.destination.database
    {
        return Err(ReplicateError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }

    let replication = &config.replication;
    if replication.page_size == 0 {
        return Err(ReplicateError::Config(
            "replication.page_size must be at least 1".into(),
        ));
    }
    if replication.sample_size == 0 {
        return Err(ReplicateError::Config(
            "replication.sample_size must be at least 1".into(),
        ));
    }
    if replication.sample_size > replication.page_size {
        return Err(ReplicateError::Config(format!(
            "replication.sample_size ({}) cannot exceed replication.page_size ({})",
            replication.sample_size, replication.page_size
        )));
    }
    if replication.projection.trim().is_empty() {
        return Err(ReplicateError::Config(
            "replication.projection cannot be empty".into(),
        ));
    }
    if !JSON_EACH_ROW_FORMATS.contains(&replication.format.as_str()) {
        return Err(ReplicateError::Config(format!(
            "replication.format must be one of {} (got {:?})",
            JSON_EACH_ROW_FORMATS.join(", "),
            replication.format
        )));
    }
    if replication.identifier_column.trim().is_empty() {
        return Err(ReplicateError::Config(
            "replication.identifier_column cannot be empty".into(),
        ));
    }
    if matches!(replication.table_prefix.as_deref(), Some("")) {
        return Err(ReplicateError::Config(
            "replication.table_prefix cannot be empty when set".into(),
        ));
    }

    if config.loader.client_binary.trim().is_empty() {
        return Err(ReplicateError::Config(
            "loader.client_binary is required".into(),
        ));
    }

    Ok(())
}

fn validate_endpoint(name: &str, endpoint: &WarehouseConfig) -> Result<()> {
    if endpoint.host.is_empty() {
        return Err(ReplicateError::Config(format!("{name}.host is required")));
    }
    if endpoint.database.is_empty() {
        return Err(ReplicateError::Config(format!(
            "{name}.database is required"
        )));
    }
    if endpoint.user.is_empty() {
        return Err(ReplicateError::Config(format!("{name}.user is required")));
    }
    Ok(())
}
