//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::SchemaEvolutionMode;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Warehouse the tables are read from.
    pub source: WarehouseConfig,

    /// Warehouse the tables are written to.
    pub destination: WarehouseConfig,

    /// Replication behavior.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Bulk loader settings.
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// Connection settings for one ClickHouse endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Server host.
    pub host: String,

    /// HTTP interface port (default: 8123).
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Native protocol port used by the command-line client (default: 9000).
    #[serde(default = "default_native_port")]
    pub native_port: u16,

    /// Username (default: "default").
    #[serde(default = "default_user")]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Database (namespace) the tables live in.
    pub database: String,

    /// Use HTTPS / `--secure` (default: false).
    #[serde(default)]
    pub secure: bool,
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("native_port", &self.native_port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Replication behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// How rows are pulled out of the source (default: paged).
    #[serde(default)]
    pub mode: ExtractionMode,

    /// Rows per page in paged mode (default: 5000).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Records handed to warehouse-side schema inference (default: 10).
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Source projection: `*` or the name of a column holding JSON documents.
    #[serde(default = "default_projection")]
    pub projection: String,

    /// Optional ORDER BY expression making offset pagination deterministic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_order_by: Option<String>,

    /// Prefix stripped from source table names to form destination names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_prefix: Option<String>,

    /// Source tables to include (`*` wildcards). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Source tables to exclude (`*` wildcards).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Column created as non-null and used as the sort key (default: "id").
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,

    /// When a destination counts as caught up (default: at_least).
    #[serde(default)]
    pub completeness: CompletenessPolicy,

    /// What a table failure does to the rest of the run (default: fail_fast).
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Whether new keys in later pages add destination columns (default: merge).
    #[serde(default)]
    pub schema_evolution: SchemaEvolutionMode,

    /// Shape of the records written to the staging artifact (default: verbatim).
    #[serde(default)]
    pub payload: PayloadMode,

    /// Directory holding staging artifacts (default: current directory).
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Timestamp column logged as the destination's latest sync marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_marker_column: Option<String>,

    /// Record format used for extraction and loading (default: JSONEachRow).
    ///
    /// Must be one of [`JSON_EACH_ROW_FORMATS`]: the staging artifact holds
    /// one JSON object per line.
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::default(),
            page_size: default_page_size(),
            sample_size: default_sample_size(),
            projection: default_projection(),
            extract_order_by: None,
            table_prefix: None,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            identifier_column: default_identifier_column(),
            completeness: CompletenessPolicy::default(),
            failure_policy: FailurePolicy::default(),
            schema_evolution: SchemaEvolutionMode::default(),
            payload: PayloadMode::default(),
            staging_dir: default_staging_dir(),
            sync_marker_column: None,
            format: default_format(),
        }
    }
}

/// Format names ClickHouse accepts for newline-delimited JSON objects.
pub const JSON_EACH_ROW_FORMATS: &[&str] = &["JSONEachRow", "JSONLines", "NDJSON"];

/// How rows are extracted from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// LIMIT/OFFSET pages through the HTTP client.
    #[default]
    Paged,

    /// One `SELECT *` through the command-line client into a raw export
    /// file, read back in `page_size` chunks into the staging artifact.
    Cli,
}

/// Completeness test applied to (source rows, destination rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessPolicy {
    /// Destination holds at least as many rows as the source.
    #[default]
    AtLeast,

    /// Destination holds exactly as many rows as the source.
    Exact,
}

/// Effect of a table failure on the remaining tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run and return the table's error.
    #[default]
    FailFast,

    /// Record the failure and move on to the next table.
    Continue,
}

/// Shape of records in the staging artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// Records exactly as extracted.
    #[default]
    Verbatim,

    /// Flattened records with scalar values rendered as text.
    Flattened,
}

/// Bulk loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Which loader ingests the staging artifact (default: client).
    #[serde(default)]
    pub kind: LoaderKind,

    /// Command-line client binary (default: "clickhouse-client").
    #[serde(default = "default_client_binary")]
    pub client_binary: String,

    /// `--name=value` settings passed to the client on load.
    #[serde(default = "default_loader_settings")]
    pub settings: BTreeMap<String, String>,

    /// HTTP request timeout in seconds (default: 1800).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            kind: LoaderKind::default(),
            client_binary: default_client_binary(),
            settings: default_loader_settings(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Bulk loader implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// Pipe the artifact into the command-line client.
    #[default]
    Client,

    /// Stream the artifact as one INSERT over the HTTP interface.
    Insert,
}

// Default value functions for serde
fn default_http_port() -> u16 {
    8123
}

fn default_native_port() -> u16 {
    9000
}

fn default_user() -> String {
    "default".to_string()
}

fn default_page_size() -> usize {
    5_000
}

fn default_sample_size() -> usize {
    10
}

fn default_projection() -> String {
    "*".to_string()
}

fn default_identifier_column() -> String {
    "id".to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_format() -> String {
    "JSONEachRow".to_string()
}

fn default_client_binary() -> String {
    "clickhouse-client".to_string()
}

fn default_request_timeout_secs() -> u64 {
    1_800
}

/// Tuning flags the loader has always been run with.
pub fn default_loader_settings() -> BTreeMap<String, String> {
    [
        ("input_format_skip_unknown_fields", "1"),
        ("http_send_timeout", "3600"),
        ("receive_timeout", "30000"),
        ("tcp_keep_alive_timeout", "2000"),
        ("http_receive_timeout", "600"),
        ("max_insert_block_size", "80000"),
        ("min_compress_block_size", "262144"),
        ("max_memory_usage", "55000000000"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
