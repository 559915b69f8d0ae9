//! Whole-table extraction through the ClickHouse command-line client.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{LoaderConfig, WarehouseConfig};
use crate::core::{ProcessRunner, ProcessSpec, TableExporter};
use crate::error::{ReplicateError, Result};
use crate::warehouse::sql;

/// Dumps a source table with `SELECT *`, client stdout going to a file.
pub struct CliExporter {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    connection_args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CliExporter {
    pub fn new(source: &WarehouseConfig, loader: &LoaderConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            binary: loader.client_binary.clone(),
            connection_args: source.client_args(),
            env: source.client_env(),
        }
    }

    pub fn command(
        &self,
        namespace: &str,
        table: &str,
        format: &str,
        destination: &Path,
    ) -> Result<ProcessSpec> {
        let query = sql::select_all(namespace, table, format)?;
        let mut args = self.connection_args.clone();
        args.push(format!("--database={namespace}"));
        args.push(format!("--query={query}"));
        Ok(ProcessSpec::new(&self.binary)
            .args(args)
            .envs(&self.env)
            .stdout_to(destination))
    }
}

#[async_trait]
impl TableExporter for CliExporter {
    async fn export(
        &self,
        namespace: &str,
        table: &str,
        format: &str,
        destination: &Path,
    ) -> Result<()> {
        let spec = self.command(namespace, table, format, destination)?;
        info!(
            table = %table,
            destination = %destination.display(),
            command = %spec.command_line(),
            "exporting table"
        );

        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(ReplicateError::process(
                &self.binary,
                format!(
                    "export of {namespace}.{table} exited with code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(())
    }
}
