//! Bulk loading by streaming the artifact as one INSERT over HTTP.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::JSON_EACH_ROW_FORMATS;
use crate::core::{BulkLoader, LoadReport, Record, Warehouse};
use crate::error::{ReplicateError, Result};
use crate::staging::StagingReader;

/// Lines parsed per read while checking the artifact.
const CHECK_CHUNK: usize = 10_000;

/// Loads JSON-each-row artifacts through [`Warehouse::insert_artifact`].
///
/// Every record is parsed before anything is sent, so a malformed artifact
/// never reaches the destination.
pub struct InsertLoader {
    warehouse: Arc<dyn Warehouse>,
    settings: BTreeMap<String, String>,
}

impl InsertLoader {
    pub fn new(warehouse: Arc<dyn Warehouse>, settings: BTreeMap<String, String>) -> Self {
        Self {
            warehouse,
            settings,
        }
    }
}

/// Parse every line of `artifact`; returns the record count.
async fn check_artifact(artifact: &Path) -> Result<u64> {
    let mut reader = StagingReader::open(artifact).await?;
    let mut records = 0u64;
    loop {
        let lines = reader.next_chunk(CHECK_CHUNK).await?;
        if lines.is_empty() {
            return Ok(records);
        }
        for line in &lines {
            Record::parse(line)?;
        }
        records += lines.len() as u64;
    }
}

#[async_trait]
impl BulkLoader for InsertLoader {
    async fn load(
        &self,
        namespace: &str,
        table: &str,
        artifact: &Path,
        format: &str,
    ) -> Result<LoadReport> {
        if !JSON_EACH_ROW_FORMATS.contains(&format) {
            return Err(ReplicateError::Config(format!(
                "insert loader only reads JSON-each-row artifacts, got {format}"
            )));
        }

        let started = Instant::now();
        let staged = check_artifact(artifact).await?;
        info!(
            table = %table,
            artifact = %artifact.display(),
            records = staged,
            "inserting staged records"
        );

        let written = self
            .warehouse
            .insert_artifact(namespace, table, artifact, format, &self.settings)
            .await?;
        debug!(table = %table, staged, written = ?written, "insert finished");

        tokio::fs::remove_file(artifact).await?;
        Ok(LoadReport {
            records: Some(written.unwrap_or(staged)),
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::core::PageRequest;
    use crate::schema::ColumnDefinition;

    struct Insert {
        body: String,
        format: String,
        settings: BTreeMap<String, String>,
    }

    /// Records every insert; everything else is a no-op.
    #[derive(Default)]
    struct RecordingWarehouse {
        inserts: Mutex<Vec<Insert>>,
        written: Option<u64>,
        fail: bool,
    }

    #[async_trait]
    impl Warehouse for RecordingWarehouse {
        fn endpoint(&self) -> &str {
            "recording"
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn list_tables(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn table_exists(&self, _: &str, _: &str) -> Result<bool> {
            Ok(true)
        }
        async fn row_count(&self, _: &str, _: &str) -> Result<u64> {
            Ok(0)
        }
        async fn column_names(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn fetch_page(&self, _: &str, _: &str, _: &PageRequest) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn create_table_from_sample(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[String],
        ) -> Result<()> {
            Ok(())
        }
        async fn create_table_explicit(
            &self,
            _: &str,
            _: &str,
            _: &[ColumnDefinition],
            _: &str,
        ) -> Result<()> {
            Ok(())
        }
        async fn add_columns(&self, _: &str, _: &str, _: &[String]) -> Result<()> {
            Ok(())
        }
        async fn create_namespace(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn optimize_table(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn latest_sync_marker(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }
        async fn insert_artifact(
            &self,
            _: &str,
            _: &str,
            artifact: &Path,
            format: &str,
            settings: &BTreeMap<String, String>,
        ) -> Result<Option<u64>> {
            let body = std::fs::read_to_string(artifact)?;
            self.inserts.lock().unwrap().push(Insert {
                body,
                format: format.to_string(),
                settings: settings.clone(),
            });
            if self.fail {
                return Err(ReplicateError::query(
                    "INSERT INTO `analytics`.`orders` FORMAT JSONEachRow",
                    "HTTP 500: Code: 241. DB::Exception: Memory limit exceeded",
                ));
            }
            Ok(self.written)
        }
    }

    fn artifact(dir: &Path, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join("analytics_orders_final.jsonl");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    fn settings() -> BTreeMap<String, String> {
        BTreeMap::from([("input_format_skip_unknown_fields".to_string(), "1".to_string())])
    }

    #[tokio::test]
    async fn test_one_insert_for_whole_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(
            dir.path(),
            &[r#"{"id":"1"}"#, r#"{"id":"2"}"#, "", r#"{"id":"3"}"#],
        );
        let warehouse = Arc::new(RecordingWarehouse::default());
        let loader = InsertLoader::new(warehouse.clone(), settings());

        let report = loader
            .load("analytics", "orders", &path, "JSONEachRow")
            .await
            .unwrap();

        assert_eq!(report.records, Some(3));
        let inserts = warehouse.inserts.lock().unwrap();
        assert_eq!(inserts.len(), 1);
        assert!(inserts[0].body.contains(r#"{"id":"3"}"#));
        assert_eq!(inserts[0].format, "JSONEachRow");
        assert_eq!(inserts[0].settings, settings());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_server_row_count_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path(), &[r#"{"id":"1"}"#, r#"{"id":"2"}"#]);
        let warehouse = Arc::new(RecordingWarehouse {
            written: Some(7),
            ..Default::default()
        });
        let loader = InsertLoader::new(warehouse, BTreeMap::new());

        let report = loader
            .load("analytics", "orders", &path, "NDJSON")
            .await
            .unwrap();
        assert_eq!(report.records, Some(7));
    }

    #[tokio::test]
    async fn test_rejected_insert_keeps_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (1..=5).map(|i| format!(r#"{{"id":"{i}"}}"#)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let path = artifact(dir.path(), &refs);
        let warehouse = Arc::new(RecordingWarehouse {
            fail: true,
            ..Default::default()
        });
        let loader = InsertLoader::new(warehouse.clone(), BTreeMap::new());

        let err = loader
            .load("analytics", "orders", &path, "JSONEachRow")
            .await
            .unwrap_err();

        assert!(matches!(err, ReplicateError::Query { .. }));
        assert!(path.exists());
        // The whole artifact went out in the one failed statement.
        let inserts = warehouse.inserts.lock().unwrap();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].body.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_rejects_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path(), &["1,a"]);
        let loader = InsertLoader::new(Arc::new(RecordingWarehouse::default()), BTreeMap::new());

        let err = loader
            .load("analytics", "orders", &path, "CSV")
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicateError::Config(_)));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_bad_record_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path(), &[r#"{"id":"1"}"#, "not json"]);
        let warehouse = Arc::new(RecordingWarehouse::default());
        let loader = InsertLoader::new(warehouse.clone(), BTreeMap::new());

        assert!(loader
            .load("analytics", "orders", &path, "JSONEachRow")
            .await
            .is_err());
        assert!(path.exists());
        assert!(warehouse.inserts.lock().unwrap().is_empty());
    }
}
