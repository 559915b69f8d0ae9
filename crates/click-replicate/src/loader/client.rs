//! Bulk loading through the ClickHouse command-line client.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{LoaderConfig, WarehouseConfig};
use crate::core::{BulkLoader, LoadReport, ProcessRunner, ProcessSpec};
use crate::error::{Result, SubmissionError};
use crate::warehouse::sql;

/// Streams the artifact into `clickhouse-client --query "INSERT ..."`.
pub struct ClientBulkLoader {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    connection_args: Vec<String>,
    env: BTreeMap<String, String>,
    settings: BTreeMap<String, String>,
}

impl ClientBulkLoader {
    pub fn new(
        destination: &WarehouseConfig,
        loader: &LoaderConfig,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            runner,
            binary: loader.client_binary.clone(),
            connection_args: destination.client_args(),
            env: destination.client_env(),
            settings: loader.settings.clone(),
        }
    }

    /// The client invocation for one artifact.
    pub fn command(
        &self,
        namespace: &str,
        table: &str,
        artifact: &Path,
        format: &str,
    ) -> Result<ProcessSpec> {
        let query = sql::insert_format(table, format)?;
        let mut args = self.connection_args.clone();
        args.push(format!("--database={namespace}"));
        args.push(format!("--query={query}"));
        args.extend(self.settings.iter().map(|(k, v)| format!("--{k}={v}")));
        args.push("--stacktrace".to_string());

        Ok(ProcessSpec::new(&self.binary)
            .args(args)
            .envs(&self.env)
            .stdin_from(artifact))
    }
}

#[async_trait]
impl BulkLoader for ClientBulkLoader {
    async fn load(
        &self,
        namespace: &str,
        table: &str,
        artifact: &Path,
        format: &str,
    ) -> Result<LoadReport> {
        let spec = self.command(namespace, table, artifact, format)?;
        info!(
            table = %table,
            artifact = %artifact.display(),
            command = %spec.command_line(),
            "submitting bulk load"
        );

        let started = Instant::now();
        let output = self.runner.run(&spec).await?;

        if !output.success() {
            warn!(
                table = %table,
                exit_code = output.exit_code,
                artifact = %artifact.display(),
                "bulk load failed, keeping artifact"
            );
            return Err(SubmissionError {
                stdout: output.stdout,
                stderr: output.stderr,
                artifact: artifact.to_path_buf(),
                exit_code: output.exit_code,
            }
            .into());
        }

        tokio::fs::remove_file(artifact).await?;
        Ok(LoadReport {
            records: None,
            duration: started.elapsed(),
        })
    }
}
