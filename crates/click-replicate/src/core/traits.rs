//! Capability traits the replication engine is written against.
//!
//! - [`Warehouse`]: metadata, paged reads and DDL/DML on one ClickHouse endpoint
//! - [`BulkLoader`]: ingests a whole staging artifact into a destination table
//! - [`TableExporter`]: dumps a whole source table into a staging artifact
//! - [`ProcessRunner`]: runs an external program with redirected stdio
//!
//! Every implementation used in production talks to a server or spawns a
//! process; tests substitute in-memory fakes at these seams.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::schema::ColumnDefinition;

/// What a page fetch selects from the source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// `SELECT *`; each row is the record.
    AllColumns,
    /// One column holding a JSON document per row; the document is the record.
    JsonColumn(String),
}

impl Projection {
    /// `*` selects all columns, anything else names a JSON column.
    pub fn from_config(projection: &str) -> Self {
        match projection.trim() {
            "*" | "" => Projection::AllColumns,
            column => Projection::JsonColumn(column.to_string()),
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Projection::AllColumns => None,
            Projection::JsonColumn(c) => Some(c),
        }
    }
}

/// Options for reading one page of a table.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub projection: Projection,
    /// Optional ORDER BY expression for deterministic offsets.
    pub order_by: Option<String>,
    /// Serialization format of the returned records.
    pub format: String,
    /// Maximum records in the page.
    pub limit: usize,
    /// Records to skip.
    pub offset: u64,
}

/// One ClickHouse endpoint.
///
/// The namespace is passed on every call so one client can serve several
/// databases on the same server.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Label used in logs and connection errors.
    fn endpoint(&self) -> &str;

    /// Check that the server answers.
    async fn ping(&self) -> Result<()>;

    /// Table names in `namespace`, sorted.
    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>>;

    async fn table_exists(&self, namespace: &str, table: &str) -> Result<bool>;

    /// Row count; zero is a valid answer.
    async fn row_count(&self, namespace: &str, table: &str) -> Result<u64>;

    /// Column names in table order.
    async fn column_names(&self, namespace: &str, table: &str) -> Result<Vec<String>>;

    /// Serialized records of one page.
    ///
    /// Returns fewer than `request.limit` records only on the last page.
    async fn fetch_page(
        &self,
        namespace: &str,
        table: &str,
        request: &PageRequest,
    ) -> Result<Vec<String>>;

    /// Create an empty table whose structure is inferred from `sample`.
    async fn create_table_from_sample(
        &self,
        namespace: &str,
        table: &str,
        order_by: &str,
        sample: &[String],
    ) -> Result<()>;

    /// Create a table with explicitly typed columns.
    async fn create_table_explicit(
        &self,
        namespace: &str,
        table: &str,
        columns: &[ColumnDefinition],
        order_by: &str,
    ) -> Result<()>;

    /// Add nullable text columns that do not exist yet.
    async fn add_columns(&self, namespace: &str, table: &str, columns: &[String]) -> Result<()>;

    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Ask the engine to merge parts (and collapse duplicate keys).
    async fn optimize_table(&self, namespace: &str, table: &str) -> Result<()>;

    /// Latest value of a timestamp column, `None` for an empty table.
    async fn latest_sync_marker(
        &self,
        namespace: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Stream a newline-delimited artifact into `table` as a single INSERT.
    ///
    /// `settings` travel with the statement. Returns the rows the server
    /// reports written, when it reports them.
    async fn insert_artifact(
        &self,
        namespace: &str,
        table: &str,
        artifact: &Path,
        format: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<Option<u64>>;
}

/// Outcome of a successful bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records ingested, when the loader can tell.
    pub records: Option<u64>,
    pub duration: Duration,
}

/// Ingests a staging artifact into a destination table.
///
/// On success the artifact is removed; on failure it is left in place.
#[async_trait]
pub trait BulkLoader: Send + Sync {
    async fn load(
        &self,
        namespace: &str,
        table: &str,
        artifact: &Path,
        format: &str,
    ) -> Result<LoadReport>;
}

/// Writes a whole source table into a staging artifact.
#[async_trait]
pub trait TableExporter: Send + Sync {
    async fn export(
        &self,
        namespace: &str,
        table: &str,
        format: &str,
        destination: &Path,
    ) -> Result<()>;
}

/// An external program invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// File streamed to the child's stdin.
    pub stdin: Option<PathBuf>,
    /// File the child's stdout is written to instead of being captured.
    pub stdout: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Extra environment variables for the child.
    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Program and arguments for logs. The environment is never included.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|arg| {
            if arg.contains(char::is_whitespace) {
                format!("{arg:?}")
            } else {
                arg.clone()
            }
        }));
        parts.join(" ")
    }
}

/// Exit status and captured streams of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external programs.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_from_config() {
        assert_eq!(Projection::from_config("*"), Projection::AllColumns);
        assert_eq!(
            Projection::from_config("_airbyte_data"),
            Projection::JsonColumn("_airbyte_data".into())
        );
        assert_eq!(Projection::AllColumns.column(), None);
    }

    #[test]
    fn test_command_line_leaves_out_env() {
        let env = BTreeMap::from([("CLICKHOUSE_PASSWORD".to_string(), "hunter2".to_string())]);
        let spec = ProcessSpec::new("clickhouse-client")
            .args(["--host=ch", "--query=INSERT INTO `t` FORMAT JSONEachRow"])
            .envs(&env);

        let line = spec.command_line();
        assert!(line.starts_with("clickhouse-client --host=ch "));
        assert!(line.contains("\"--query=INSERT INTO `t` FORMAT JSONEachRow\""));
        assert!(!line.contains("hunter2"));
        assert_eq!(spec.env.get("CLICKHOUSE_PASSWORD").map(String::as_str), Some("hunter2"));
    }
}
