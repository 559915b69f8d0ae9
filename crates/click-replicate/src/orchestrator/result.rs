//! Run and per-table outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Why a table was not replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The source table has no rows.
    EmptySource,
    /// The destination already satisfies the completeness policy.
    UpToDate,
    /// The source reported rows but extraction returned none.
    NoRowsExtracted,
}

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Replicated { rows: u64, pages: u64 },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

/// Outcome for one table of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub source_table: String,
    pub destination_table: String,
    #[serde(flatten)]
    pub outcome: TableOutcome,
}

/// Result of a replication run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: "completed" or "failed".
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables selected for the run.
    pub tables_total: usize,

    pub tables_replicated: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,

    /// Records handed to the bulk loader.
    pub rows_loaded: u64,

    /// Source names of failed tables.
    pub failed_tables: Vec<String>,

    pub tables: Vec<TableReport>,
}

impl ReplicationResult {
    /// Summarize the reports of a finished run.
    pub fn from_reports(
        run_id: String,
        started_at: DateTime<Utc>,
        tables_total: usize,
        tables: Vec<TableReport>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let mut tables_replicated = 0;
        let mut tables_skipped = 0;
        let mut rows_loaded = 0;
        let mut failed_tables = Vec::new();
        for report in &tables {
            match &report.outcome {
                TableOutcome::Replicated { rows, .. } => {
                    tables_replicated += 1;
                    rows_loaded += rows;
                }
                TableOutcome::Skipped { .. } => tables_skipped += 1,
                TableOutcome::Failed { .. } => failed_tables.push(report.source_table.clone()),
            }
        }

        let status = if failed_tables.is_empty() {
            "completed"
        } else {
            "failed"
        };

        Self {
            run_id,
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds,
            tables_total,
            tables_replicated,
            tables_skipped,
            tables_failed: failed_tables.len(),
            rows_loaded,
            failed_tables,
            tables,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Row counts of one table on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub source_table: String,
    pub destination_table: String,
    pub source_rows: u64,
    /// `None` when the destination table does not exist.
    pub destination_rows: Option<u64>,
    pub complete: bool,
}

/// Reachability of both endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub source_endpoint: String,
    pub source_ok: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub destination_endpoint: String,
    pub destination_ok: bool,
    pub destination_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_error: Option<String>,
}
