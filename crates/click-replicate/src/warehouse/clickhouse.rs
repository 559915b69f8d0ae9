//! ClickHouse over its HTTP interface.
//!
//! Statements are POSTed as the request body; credentials travel in the
//! `X-ClickHouse-User` / `X-ClickHouse-Key` headers. Inserts put the
//! statement in the `query` parameter and stream the data as the body.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::WarehouseConfig;
use crate::core::{PageRequest, Projection, Warehouse};
use crate::error::{ReplicateError, Result};
use crate::schema::ColumnDefinition;

use super::sql;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for one ClickHouse endpoint.
pub struct ClickHouseClient {
    http: Client,
    url: String,
    user: String,
    password: String,
    endpoint: String,
    cancel: CancellationToken,
}

#[derive(Deserialize)]
struct NameRow {
    name: String,
}

/// `X-ClickHouse-Summary` response header; counters arrive as strings.
#[derive(Deserialize)]
struct QuerySummary {
    written_rows: String,
}

impl ClickHouseClient {
    /// Build a client; no request is made until the first call.
    pub fn new(config: &WarehouseConfig, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            url: config.http_url(),
            user: config.user.clone(),
            password: config.password.clone(),
            endpoint: config.endpoint(),
            cancel: CancellationToken::new(),
        })
    }

    /// Abort in-flight requests with [`ReplicateError::Cancelled`] once
    /// `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one statement and return the response body.
    pub async fn execute(&self, statement: &str) -> Result<String> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReplicateError::Cancelled),
            result = self.send(statement) => result,
        }
    }

    async fn send(&self, statement: &str) -> Result<String> {
        debug!(
            endpoint = %self.endpoint,
            bytes = statement.len(),
            "executing statement: {}",
            preview(statement)
        );

        let request = self.http.post(&self.url).body(statement.to_string());
        let (body, _) = self.dispatch(statement, request).await?;
        Ok(body)
    }

    async fn send_artifact(
        &self,
        statement: &str,
        artifact: &Path,
        settings: &BTreeMap<String, String>,
    ) -> Result<Option<u64>> {
        let file = tokio::fs::File::open(artifact).await?;
        debug!(
            endpoint = %self.endpoint,
            artifact = %artifact.display(),
            "streaming insert: {}",
            statement
        );

        let request = self
            .http
            .post(&self.url)
            .query(&[("query", statement), ("wait_end_of_query", "1")])
            .query(settings)
            .body(reqwest::Body::from(file));
        let (_, written) = self.dispatch(statement, request).await?;
        Ok(written)
    }

    /// Send `request` with credentials. Returns the body and the rows the
    /// server reports written.
    async fn dispatch(
        &self,
        statement: &str,
        request: RequestBuilder,
    ) -> Result<(String, Option<u64>)> {
        let response = request
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let written = response
            .headers()
            .get("X-ClickHouse-Summary")
            .and_then(|value| value.to_str().ok())
            .and_then(written_rows);
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(ReplicateError::query(
                statement,
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }
        Ok((body, written))
    }

    fn transport_error(&self, e: reqwest::Error) -> ReplicateError {
        if e.is_connect() || e.is_timeout() {
            ReplicateError::connection(&self.endpoint, e.to_string())
        } else {
            ReplicateError::Http(e)
        }
    }

    async fn send_ping(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}ping", self.url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReplicateError::connection(
                &self.endpoint,
                format!("ping returned HTTP {}", response.status().as_u16()),
            ))
        }
    }

    async fn count(&self, statement: &str) -> Result<u64> {
        let body = self.execute(statement).await?;
        parse_count(statement, &body)
    }
}

#[async_trait]
impl Warehouse for ClickHouseClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReplicateError::Cancelled),
            result = self.send_ping() => result,
        }
    }

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let body = self.execute(&sql::list_tables(namespace)).await?;
        parse_names(&body)
    }

    async fn table_exists(&self, namespace: &str, table: &str) -> Result<bool> {
        Ok(self.count(&sql::table_exists(namespace, table)).await? > 0)
    }

    async fn row_count(&self, namespace: &str, table: &str) -> Result<u64> {
        self.count(&sql::row_count(namespace, table)?).await
    }

    async fn column_names(&self, namespace: &str, table: &str) -> Result<Vec<String>> {
        let body = self.execute(&sql::column_names(namespace, table)).await?;
        parse_names(&body)
    }

    async fn fetch_page(
        &self,
        namespace: &str,
        table: &str,
        request: &PageRequest,
    ) -> Result<Vec<String>> {
        // Unwrapping a JSON column needs a JSON envelope around each row.
        let format = match request.projection {
            Projection::AllColumns => request.format.as_str(),
            Projection::JsonColumn(_) => "JSONEachRow",
        };
        let statement = sql::fetch_page(
            namespace,
            table,
            request.projection.column(),
            request.order_by.as_deref(),
            format,
            request.limit,
            request.offset,
        )?;
        let body = self.execute(&statement).await?;
        match &request.projection {
            Projection::AllColumns => Ok(split_rows(&body)),
            Projection::JsonColumn(column) => unwrap_json_column(&body, column),
        }
    }

    async fn create_table_from_sample(
        &self,
        namespace: &str,
        table: &str,
        order_by: &str,
        sample: &[String],
    ) -> Result<()> {
        let statement = sql::create_table_from_sample(namespace, table, order_by, sample)?;
        self.execute(&statement).await.map(|_| ())
    }

    async fn create_table_explicit(
        &self,
        namespace: &str,
        table: &str,
        columns: &[ColumnDefinition],
        order_by: &str,
    ) -> Result<()> {
        let statement = sql::create_table_explicit(namespace, table, columns, order_by)?;
        self.execute(&statement).await.map(|_| ())
    }

    async fn add_columns(&self, namespace: &str, table: &str, columns: &[String]) -> Result<()> {
        if columns.is_empty() {
            return Ok(());
        }
        let statement = sql::add_columns(namespace, table, columns)?;
        self.execute(&statement).await.map(|_| ())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.execute(&sql::create_namespace(namespace)?)
            .await
            .map(|_| ())
    }

    async fn optimize_table(&self, namespace: &str, table: &str) -> Result<()> {
        self.execute(&sql::optimize_table(namespace, table)?)
            .await
            .map(|_| ())
    }

    async fn latest_sync_marker(
        &self,
        namespace: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let statement = sql::latest_sync_marker(namespace, table, column)?;
        let body = self.execute(&statement).await?;
        parse_sync_marker(&statement, &body)
    }

    async fn insert_artifact(
        &self,
        namespace: &str,
        table: &str,
        artifact: &Path,
        format: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<Option<u64>> {
        let statement = sql::insert_into(namespace, table, format)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReplicateError::Cancelled),
            result = self.send_artifact(&statement, artifact, settings) => result,
        }
    }
}

fn written_rows(summary: &str) -> Option<u64> {
    serde_json::from_str::<QuerySummary>(summary)
        .ok()?
        .written_rows
        .parse()
        .ok()
}

fn split_rows(body: &str) -> Vec<String> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn unwrap_json_column(body: &str, column: &str) -> Result<Vec<String>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| -> Result<String> {
            let mut row: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)?;
            match row.remove(column) {
                Some(serde_json::Value::String(document)) => {
                    // Re-serialize so pretty-printed documents stay on one line.
                    let parsed: serde_json::Value = serde_json::from_str(&document)?;
                    Ok(parsed.to_string())
                }
                Some(serde_json::Value::Object(map)) => {
                    Ok(serde_json::Value::Object(map).to_string())
                }
                Some(other) => Err(ReplicateError::Record(format!(
                    "column {column} holds {other}, expected a JSON document"
                ))),
                None => Err(ReplicateError::Record(format!(
                    "column {column} missing from row"
                ))),
            }
        })
        .collect()
}

fn parse_names(body: &str) -> Result<Vec<String>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| -> Result<String> { Ok(serde_json::from_str::<NameRow>(line)?.name) })
        .collect()
}

fn parse_count(statement: &str, body: &str) -> Result<u64> {
    body.trim().parse::<u64>().map_err(|e| {
        ReplicateError::query(statement, format!("unexpected count {:?}: {}", body.trim(), e))
    })
}

fn parse_sync_marker(statement: &str, body: &str) -> Result<Option<DateTime<Utc>>> {
    let text = body.trim();
    if text.is_empty() || text == "\\N" {
        return Ok(None);
    }
    let seconds: i64 = text.parse().map_err(|e| {
        ReplicateError::query(statement, format!("unexpected timestamp {:?}: {}", text, e))
    })?;
    if seconds == 0 {
        return Ok(None);
    }
    Ok(DateTime::from_timestamp(seconds, 0))
}

fn preview(statement: &str) -> &str {
    const MAX: usize = 200;
    if statement.len() <= MAX {
        return statement;
    }
    let mut end = MAX;
    while !statement.is_char_boundary(end) {
        end -= 1;
    }
    &statement[..end]
}
