//! Replication orchestrator - main workflow coordinator.
//!
//! Tables are replicated one at a time:
//!
//! 1. list the source namespace and plan destination names
//! 2. skip empty sources and destinations that are already complete
//! 3. extract pages into a staging artifact, creating the destination
//!    table from the first page and adding columns for new keys
//! 4. bulk load the artifact, then optimize the destination table

mod completeness;
mod plan;
mod result;


pub use completeness::CompletenessSignal;
pub use plan::{destination_name, matches_pattern, plan_tables, TablePlan};
pub use result::{
    HealthReport, ReplicationResult, SkipReason, TableOutcome, TableReport, ValidationReport,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Dispatch, Instrument};

use crate::config::{Config, ExtractionMode, FailurePolicy, PayloadMode};
use crate::core::{BulkLoader, PageRequest, Projection, Record, TableExporter, Warehouse};
use crate::error::{ReplicateError, Result};
use crate::extract::CliExporter;
use crate::loader;
use crate::process::TokioProcessRunner;
use crate::schema::{
    column_definitions, flatten_as_text, order_by_for, order_by_for_keys, propose_column_types,
    record_keys, SchemaDiff, SchemaEvolutionMode,
};
use crate::staging::{artifact_path, StagingFile, StagingReader};
use crate::warehouse::ClickHouseClient;

/// Replication orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn Warehouse>,
    destination: Arc<dyn Warehouse>,
    loader: Arc<dyn BulkLoader>,
    exporter: Option<Arc<dyn TableExporter>>,
    cancel: CancellationToken,
    dispatch: Option<Dispatch>,
}

/// Per-table state carried across pages.
#[derive(Debug, Default)]
struct TableProgress {
    destination_exists: bool,
    /// Destination columns, fetched once the table exists.
    columns: Option<BTreeSet<String>>,
    pages: u64,
}

impl Orchestrator {
    /// Create an orchestrator talking to the configured endpoints.
    ///
    /// All collaborators share one cancellation token, see
    /// [`cancellation_token`](Self::cancellation_token).
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let timeout = config.loader.request_timeout();

        let source: Arc<dyn Warehouse> = Arc::new(
            ClickHouseClient::new(&config.source, timeout)?.with_cancellation(cancel.clone()),
        );
        let destination: Arc<dyn Warehouse> = Arc::new(
            ClickHouseClient::new(&config.destination, timeout)?
                .with_cancellation(cancel.clone()),
        );
        let runner = Arc::new(TokioProcessRunner::new().with_cancellation(cancel.clone()));
        let loader = loader::from_config(&config, destination.clone(), runner.clone());
        let exporter: Arc<dyn TableExporter> =
            Arc::new(CliExporter::new(&config.source, &config.loader, runner));

        Ok(Self {
            config,
            source,
            destination,
            loader,
            exporter: Some(exporter),
            cancel,
            dispatch: None,
        })
    }

    /// Create an orchestrator from already-built collaborators.
    pub fn with_components(
        config: Config,
        source: Arc<dyn Warehouse>,
        destination: Arc<dyn Warehouse>,
        loader: Arc<dyn BulkLoader>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
            loader,
            exporter: None,
            cancel: CancellationToken::new(),
            dispatch: None,
        }
    }

    /// Exporter used in `cli` extraction mode.
    pub fn with_exporter(mut self, exporter: Arc<dyn TableExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Replace the run's cancellation token.
    ///
    /// Collaborators built by [`new`](Self::new) keep the original token;
    /// cancel through [`cancellation_token`](Self::cancellation_token) instead.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Route this orchestrator's events to `dispatch` instead of the
    /// default subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Token that cancels the run and every in-flight call.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the replication.
    pub async fn run(&self) -> Result<ReplicationResult> {
        match &self.dispatch {
            Some(dispatch) => self.run_inner().with_subscriber(dispatch.clone()).await,
            None => self.run_inner().await,
        }
    }

    /// Compare source and destination row counts for every planned table.
    pub async fn validate(&self) -> Result<Vec<ValidationReport>> {
        match &self.dispatch {
            Some(dispatch) => self.validate_inner().with_subscriber(dispatch.clone()).await,
            None => self.validate_inner().await,
        }
    }

    /// Ping both endpoints.
    pub async fn health_check(&self) -> HealthReport {
        match &self.dispatch {
            Some(dispatch) => {
                self.health_check_inner()
                    .with_subscriber(dispatch.clone())
                    .await
            }
            None => self.health_check_inner().await,
        }
    }

    async fn run_inner(&self) -> Result<ReplicationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let source_ns = &self.config.source.database;
        let dest_ns = &self.config.destination.database;

        info!(
            run_id = %run_id,
            source = %self.source.endpoint(),
            destination = %self.destination.endpoint(),
            mode = ?self.config.replication.mode,
            "starting replication run"
        );

        let tables = self.planned_tables().await?;
        info!(tables = tables.len(), namespace = %source_ns, "tables selected for replication");

        if let Err(e) = self.guard(self.destination.create_namespace(dest_ns)).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(namespace = %dest_ns, error = %e, "failed to create destination namespace");
        }

        let mut reports = Vec::with_capacity(tables.len());
        let mut table_error = None;

        for plan in &tables {
            if self.cancel.is_cancelled() {
                return Err(ReplicateError::Cancelled);
            }

            let span = info_span!(
                "table",
                source = %plan.source,
                destination = %plan.destination
            );
            match self.replicate_table(plan).instrument(span).await {
                Ok(outcome) => reports.push(TableReport {
                    source_table: plan.source.clone(),
                    destination_table: plan.destination.clone(),
                    outcome,
                }),
                Err(e) if e.is_fatal() => {
                    error!(table = %plan.source, error = %e, "replication aborted");
                    return Err(e);
                }
                Err(e) => {
                    error!(table = %plan.source, error = %e, "table replication failed");
                    reports.push(TableReport {
                        source_table: plan.source.clone(),
                        destination_table: plan.destination.clone(),
                        outcome: TableOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                    if self.config.replication.failure_policy == FailurePolicy::FailFast {
                        table_error = Some(e);
                        break;
                    }
                }
            }
        }

        let result = ReplicationResult::from_reports(run_id, started_at, tables.len(), reports);
        info!(
            status = %result.status,
            tables = result.tables_total,
            replicated = result.tables_replicated,
            skipped = result.tables_skipped,
            failed = result.tables_failed,
            rows = result.rows_loaded,
            duration_seconds = result.duration_seconds,
            "replication run finished"
        );

        match table_error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    async fn planned_tables(&self) -> Result<Vec<TablePlan>> {
        let names = self
            .guard(self.source.list_tables(&self.config.source.database))
            .await?;
        Ok(plan_tables(names, &self.config.replication))
    }

    async fn replicate_table(&self, plan: &TablePlan) -> Result<TableOutcome> {
        let replication = &self.config.replication;
        let source_ns = &self.config.source.database;
        let dest_ns = &self.config.destination.database;

        let source_rows = self
            .guard(self.source.row_count(source_ns, &plan.source))
            .await?;
        if source_rows == 0 {
            info!("source table is empty, skipping");
            return Ok(TableOutcome::Skipped {
                reason: SkipReason::EmptySource,
            });
        }

        let destination_exists = self
            .guard(self.destination.table_exists(dest_ns, &plan.destination))
            .await?;
        if destination_exists {
            let destination_rows = self
                .guard(self.destination.row_count(dest_ns, &plan.destination))
                .await?;
            self.log_sync_marker(plan).await?;

            let signal = CompletenessSignal::new(source_rows, destination_rows);
            if signal.is_complete(replication.completeness) {
                info!(
                    source_rows,
                    destination_rows, "destination is up to date, skipping"
                );
                return Ok(TableOutcome::Skipped {
                    reason: SkipReason::UpToDate,
                });
            }
            info!(
                source_rows,
                destination_rows, "destination is behind source, replicating"
            );
        } else {
            info!(source_rows, "destination table does not exist, replicating");
        }

        let path = artifact_path(&replication.staging_dir, dest_ns, &plan.destination);
        let mut staging = StagingFile::create(&path).await?;
        let mut progress = TableProgress {
            destination_exists,
            ..TableProgress::default()
        };

        let extracted = match replication.mode {
            ExtractionMode::Paged => self.extract_paged(plan, &mut staging, &mut progress).await,
            ExtractionMode::Cli => self.extract_cli(plan, &mut staging, &mut progress).await,
        };
        if let Err(e) = extracted {
            // The partial artifact is left for inspection and never loaded.
            if let Err(flush) = staging.finish().await {
                warn!(error = %flush, "failed to flush partial staging artifact");
            }
            return Err(e);
        }

        if staging.records() == 0 {
            staging.discard().await?;
            info!("no rows extracted, skipping load");
            return Ok(TableOutcome::Skipped {
                reason: SkipReason::NoRowsExtracted,
            });
        }
        let (path, records) = staging.finish().await?;

        info!(records, pages = progress.pages, artifact = %path.display(), "extraction complete");
        let report = self
            .loader
            .load(dest_ns, &plan.destination, &path, &replication.format)
            .await?;
        info!(
            records,
            duration_ms = report.duration.as_millis() as u64,
            "bulk load complete"
        );

        if let Err(e) = self
            .guard(self.destination.optimize_table(dest_ns, &plan.destination))
            .await
        {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "optimize failed");
        }

        Ok(TableOutcome::Replicated {
            rows: records,
            pages: progress.pages,
        })
    }

    async fn extract_paged(
        &self,
        plan: &TablePlan,
        staging: &mut StagingFile,
        progress: &mut TableProgress,
    ) -> Result<()> {
        let replication = &self.config.replication;
        let mut request = PageRequest {
            projection: Projection::from_config(&replication.projection),
            order_by: replication.extract_order_by.clone(),
            format: replication.format.clone(),
            limit: replication.page_size,
            offset: 0,
        };

        loop {
            if self.cancel.is_cancelled() {
                return Err(ReplicateError::Cancelled);
            }

            let page = self
                .guard(
                    self.source
                        .fetch_page(&self.config.source.database, &plan.source, &request),
                )
                .await?;
            let fetched = page.len();
            debug!(offset = request.offset, rows = fetched, "fetched page");
            request.offset += fetched as u64;

            // A short page is still confirmed by one more, empty, request.
            if fetched == 0 {
                return Ok(());
            }
            self.write_page(plan, page, staging, progress).await?;
        }
    }

    async fn extract_cli(
        &self,
        plan: &TablePlan,
        staging: &mut StagingFile,
        progress: &mut TableProgress,
    ) -> Result<()> {
        let exporter = self.exporter.as_ref().ok_or_else(|| {
            ReplicateError::Config("cli extraction mode requires a table exporter".into())
        })?;
        let replication = &self.config.replication;
        let export_path = staging.path().with_extension("export.jsonl");

        exporter
            .export(
                &self.config.source.database,
                &plan.source,
                &replication.format,
                &export_path,
            )
            .await?;

        let mut reader = StagingReader::open(&export_path).await?;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ReplicateError::Cancelled);
            }
            let chunk = reader.next_chunk(replication.page_size).await?;
            if chunk.is_empty() {
                break;
            }
            self.write_page(plan, chunk, staging, progress).await?;
        }

        tokio::fs::remove_file(&export_path).await?;
        Ok(())
    }

    /// Shape one page, create or evolve the destination, append to staging.
    async fn write_page(
        &self,
        plan: &TablePlan,
        lines: Vec<String>,
        staging: &mut StagingFile,
        progress: &mut TableProgress,
    ) -> Result<()> {
        let replication = &self.config.replication;
        let parsed = lines
            .iter()
            .map(|line| Record::parse(line))
            .collect::<Result<Vec<_>>>()?;

        let (records, lines) = match replication.payload {
            PayloadMode::Verbatim => {
                // One record per artifact line, whatever the source sent.
                let lines: Vec<String> = lines
                    .into_iter()
                    .zip(&parsed)
                    .map(|(line, record)| {
                        if line.contains('\n') {
                            record.to_json_line()
                        } else {
                            line
                        }
                    })
                    .collect();
                (parsed, lines)
            }
            PayloadMode::Flattened => {
                let flat: Vec<Record> = parsed.iter().map(flatten_as_text).collect();
                let lines = flat.iter().map(Record::to_json_line).collect();
                (flat, lines)
            }
        };

        if !progress.destination_exists {
            let n = replication.sample_size.min(records.len());
            self.create_destination(plan, &lines[..n], &records[..n])
                .await?;
            progress.destination_exists = true;
        }

        if replication.schema_evolution == SchemaEvolutionMode::Merge {
            self.evolve_schema(plan, &records, progress).await?;
        }

        staging.append(&lines).await?;
        progress.pages += 1;
        Ok(())
    }

    /// Create the destination from a sample, falling back to explicit
    /// text columns when warehouse-side inference fails.
    async fn create_destination(
        &self,
        plan: &TablePlan,
        sample_lines: &[String],
        sample: &[Record],
    ) -> Result<()> {
        let dest_ns = &self.config.destination.database;
        let identifier = &self.config.replication.identifier_column;
        let order_by = order_by_for(sample, identifier);

        let created = self
            .guard(self.destination.create_table_from_sample(
                dest_ns,
                &plan.destination,
                &order_by,
                sample_lines,
            ))
            .await;

        match created {
            Ok(()) => {
                info!(order_by = %order_by, sample = sample.len(), "created destination table from sample");
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "sample-based table creation failed, using explicit columns");
                // Columns mirror the staged keys, nested or not.
                let keys = record_keys(sample);
                let types = propose_column_types(&keys, identifier);
                let order_by = order_by_for_keys(&keys, identifier);
                self.guard(self.destination.create_table_explicit(
                    dest_ns,
                    &plan.destination,
                    &column_definitions(&types),
                    &order_by,
                ))
                .await?;
                info!(columns = keys.len(), order_by = %order_by, "created destination table with explicit columns");
                Ok(())
            }
        }
    }

    async fn evolve_schema(
        &self,
        plan: &TablePlan,
        records: &[Record],
        progress: &mut TableProgress,
    ) -> Result<()> {
        let dest_ns = &self.config.destination.database;
        let mut known = match progress.columns.take() {
            Some(columns) => columns,
            None => self
                .guard(self.destination.column_names(dest_ns, &plan.destination))
                .await?
                .into_iter()
                .collect(),
        };

        let incoming = record_keys(records);
        let diff = SchemaDiff::between(&known, &incoming);
        if !diff.missing.is_empty() {
            debug!(columns = ?diff.missing, "page lacks destination columns, loading as null");
        }
        if diff.needs_columns() {
            info!(columns = ?diff.added, "adding new destination columns");
            self.guard(
                self.destination
                    .add_columns(dest_ns, &plan.destination, &diff.added),
            )
            .await?;
            known.extend(diff.added);
        }

        progress.columns = Some(known);
        Ok(())
    }

    /// Log the destination's latest sync marker; only fatal errors surface.
    async fn log_sync_marker(&self, plan: &TablePlan) -> Result<()> {
        let Some(column) = &self.config.replication.sync_marker_column else {
            return Ok(());
        };
        let marker = self
            .guard(self.destination.latest_sync_marker(
                &self.config.destination.database,
                &plan.destination,
                column,
            ))
            .await;
        match marker {
            Ok(Some(at)) => info!(latest_sync = %at, "destination sync marker"),
            Ok(None) => debug!("destination has no sync marker"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!(error = %e, "sync marker unavailable"),
        }
        Ok(())
    }

    async fn validate_inner(&self) -> Result<Vec<ValidationReport>> {
        let source_ns = &self.config.source.database;
        let dest_ns = &self.config.destination.database;
        let policy = self.config.replication.completeness;

        let mut reports = Vec::new();
        for plan in self.planned_tables().await? {
            let source_rows = self
                .guard(self.source.row_count(source_ns, &plan.source))
                .await?;
            let destination_rows = if self
                .guard(self.destination.table_exists(dest_ns, &plan.destination))
                .await?
            {
                Some(
                    self.guard(self.destination.row_count(dest_ns, &plan.destination))
                        .await?,
                )
            } else {
                None
            };

            let complete = match destination_rows {
                Some(rows) => CompletenessSignal::new(source_rows, rows).is_complete(policy),
                None => source_rows == 0,
            };
            if complete {
                info!(table = %plan.source, source_rows, ?destination_rows, "complete");
            } else {
                warn!(table = %plan.source, source_rows, ?destination_rows, "INCOMPLETE");
            }

            reports.push(ValidationReport {
                source_table: plan.source,
                destination_table: plan.destination,
                source_rows,
                destination_rows,
                complete,
            });
        }
        Ok(reports)
    }

    async fn health_check_inner(&self) -> HealthReport {
        let (source_ok, source_latency_ms, source_error) = ping(self.source.as_ref()).await;
        let (destination_ok, destination_latency_ms, destination_error) =
            ping(self.destination.as_ref()).await;

        HealthReport {
            healthy: source_ok && destination_ok,
            source_endpoint: self.source.endpoint().to_string(),
            source_ok,
            source_latency_ms,
            source_error,
            destination_endpoint: self.destination.endpoint().to_string(),
            destination_ok,
            destination_latency_ms,
            destination_error,
        }
    }

    /// Await a collaborator call, giving up when the run is cancelled.
    async fn guard<T, F>(&self, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReplicateError::Cancelled),
            result = call => result,
        }
    }
}

async fn ping(warehouse: &dyn Warehouse) -> (bool, u64, Option<String>) {
    let started = Instant::now();
    let result = warehouse.ping().await;
    let latency = started.elapsed().as_millis() as u64;
    match result {
        Ok(()) => {
            info!(endpoint = %warehouse.endpoint(), latency_ms = latency, "endpoint reachable");
            (true, latency, None)
        }
        Err(e) => {
            warn!(endpoint = %warehouse.endpoint(), error = %e, "endpoint unreachable");
            (false, latency, Some(e.to_string()))
        }
    }
}
