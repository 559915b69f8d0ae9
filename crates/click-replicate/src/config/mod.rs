//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl WarehouseConfig {
    /// Base URL of the HTTP interface.
    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }

    /// Short `host:port/database` label for logs and errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    /// Connection arguments for the command-line client.
    ///
    /// The password is not among them; see [`client_env`](Self::client_env).
    pub fn client_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.host),
            format!("--port={}", self.native_port),
            format!("--user={}", self.user),
        ];
        if self.secure {
            args.push("--secure".to_string());
        }
        args
    }

    /// Environment for the command-line client.
    pub fn client_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if !self.password.is_empty() {
            env.insert("CLICKHOUSE_PASSWORD".to_string(), self.password.clone());
        }
        env
    }
}

impl LoaderConfig {
    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaEvolutionMode;

    const MINIMAL: &str = r#"
source:
  host: ch-source.internal
  database: default
destination:
  host: ch-dest.internal
  database: destination
"#;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 8123);
        assert_eq!(config.source.native_port, 9000);
        assert_eq!(config.source.user, "default");
        assert_eq!(config.replication.page_size, 5_000);
        assert_eq!(config.replication.sample_size, 10);
        assert_eq!(config.replication.projection, "*");
        assert_eq!(config.replication.identifier_column, "id");
        assert_eq!(config.replication.format, "JSONEachRow");
        assert_eq!(config.replication.mode, ExtractionMode::Paged);
        assert_eq!(config.replication.completeness, CompletenessPolicy::AtLeast);
        assert_eq!(config.replication.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.replication.schema_evolution, SchemaEvolutionMode::Merge);
        assert_eq!(config.replication.payload, PayloadMode::Verbatim);
        assert_eq!(config.loader.kind, LoaderKind::Client);
        assert_eq!(config.loader.client_binary, "clickhouse-client");
        assert_eq!(
            config.loader.settings.get("max_insert_block_size").map(String::as_str),
            Some("80000")
        );
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
source:
  host: ch-source.internal
  port: 8443
  user: reader
  password: s3cret
  database: airbyte
  secure: true
destination:
  host: ch-dest.internal
  database: normalized
replication:
  mode: cli
  page_size: 1000
  sample_size: 5
  projection: _airbyte_data
  table_prefix: default_raw__stream_
  exclude_tables: ["contacts"]
  completeness: exact
  failure_policy: continue
  schema_evolution: ignore
  payload: flattened
  staging_dir: /var/lib/replicate
loader:
  kind: insert
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.http_url(), "https://ch-source.internal:8443/");
        assert_eq!(config.replication.mode, ExtractionMode::Cli);
        assert_eq!(config.replication.projection, "_airbyte_data");
        assert_eq!(
            config.replication.table_prefix.as_deref(),
            Some("default_raw__stream_")
        );
        assert_eq!(config.replication.exclude_tables, vec!["contacts"]);
        assert_eq!(config.replication.completeness, CompletenessPolicy::Exact);
        assert_eq!(config.replication.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.replication.schema_evolution, SchemaEvolutionMode::Ignore);
        assert_eq!(config.replication.payload, PayloadMode::Flattened);
        assert_eq!(config.loader.kind, LoaderKind::Insert);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(Config::from_yaml("source: [").is_err());
    }

    #[test]
    fn test_client_args_skip_empty_password() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let args = config.source.client_args();
        assert_eq!(
            args,
            vec![
                "--host=ch-source.internal".to_string(),
                "--port=9000".to_string(),
                "--user=default".to_string(),
            ]
        );
        assert!(config.source.client_env().is_empty());
    }

    #[test]
    fn test_password_goes_to_env_not_args() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.source.password = "s3cret".into();
        config.source.secure = true;

        let args = config.source.client_args();
        assert!(!args.iter().any(|a| a.contains("s3cret")));
        assert_eq!(args.last().map(String::as_str), Some("--secure"));
        assert_eq!(
            config
                .source
                .client_env()
                .get("CLICKHOUSE_PASSWORD")
                .map(String::as_str),
            Some("s3cret")
        );
    }
}
