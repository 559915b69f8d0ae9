//! # click-replicate
//!
//! Incremental ClickHouse table replication library.
//!
//! This library copies every table of a source ClickHouse database into a
//! destination database, with support for:
//!
//! - **Paged extraction** over the HTTP interface, or a whole-table dump
//!   through the command-line client
//! - **Schema inference** from a sample of records, with an explicit
//!   text-column fallback
//! - **Schema evolution** adding columns for keys that appear later
//! - **Bulk loading** of a newline-delimited JSON staging artifact
//! - **Skip logic** so a complete destination is never extracted again
//!
//! ## Example
//!
//! ```rust,no_run
//! use click_replicate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     let result = orchestrator.run().await?;
//!     println!("Loaded {} rows", result.rows_loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod extract;
pub mod loader;
pub mod orchestrator;
pub mod process;
pub mod schema;
pub mod staging;
pub mod warehouse;

// Re-exports for convenient access
pub use config::{
    CompletenessPolicy, Config, ExtractionMode, FailurePolicy, LoaderConfig, LoaderKind,
    PayloadMode, ReplicationConfig, WarehouseConfig,
};
pub use core::{BulkLoader, Record, TableExporter, Value, Warehouse};
pub use error::{ReplicateError, Result, SubmissionError};
pub use orchestrator::{
    HealthReport, Orchestrator, ReplicationResult, SkipReason, TableOutcome, TableReport,
    ValidationReport,
};
pub use schema::SchemaEvolutionMode;
pub use warehouse::ClickHouseClient;
