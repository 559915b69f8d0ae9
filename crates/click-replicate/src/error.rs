//! Error types for the replication library.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Process exit codes used by the CLI.
pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_CONNECTION_ERROR: u8 = 2;
pub const EXIT_QUERY_ERROR: u8 = 3;
pub const EXIT_SUBMISSION_ERROR: u8 = 4;
pub const EXIT_TRANSFER_ERROR: u8 = 5;
pub const EXIT_IO_ERROR: u8 = 7;
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum ReplicateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The warehouse could not be reached (refused connection, DNS, timeout).
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// The warehouse rejected a statement.
    #[error("Query failed: {message}\n  Statement: {statement}")]
    Query { statement: String, message: String },

    /// Transport-level HTTP error that is not a connectivity problem.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A serialized record could not be interpreted.
    #[error("Invalid record: {0}")]
    Record(String),

    /// The external bulk loader exited with a non-zero status.
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// An external process could not be started or awaited.
    #[error("Process {program} failed: {message}")]
    Process { program: String, message: String },

    /// Replication failed for a specific table
    #[error("Replication failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// IO error (staging files, config file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Replication was cancelled (SIGINT, etc.)
    #[error("Replication cancelled")]
    Cancelled,
}

/// Failure of the external bulk-ingestion process.
///
/// The staging artifact named by `artifact` is left on disk so the load can
/// be retried by hand or inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionError {
    pub stdout: String,
    pub stderr: String,
    pub artifact: PathBuf,
    pub exit_code: i32,
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submission failed {}: exit code {}\nStdout:\n{}\nStderr:\n{}",
            self.artifact.display(),
            self.exit_code,
            self.stdout,
            self.stderr
        )
    }
}

impl std::error::Error for SubmissionError {}

impl ReplicateError {
    /// Create a Connection error for the given endpoint.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicateError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a Query error, truncating long statements (sample payloads
    /// can be megabytes).
    pub fn query(statement: &str, message: impl Into<String>) -> Self {
        const MAX_STATEMENT_LEN: usize = 512;
        let statement = if statement.len() > MAX_STATEMENT_LEN {
            let mut end = MAX_STATEMENT_LEN;
            while !statement.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... ({} bytes)", &statement[..end], statement.len())
        } else {
            statement.to_string()
        };
        ReplicateError::Query {
            statement,
            message: message.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Process error
    pub fn process(program: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicateError::Process {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Errors that abort the whole run regardless of the failure policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplicateError::Connection { .. } | ReplicateError::Cancelled
        )
    }

    /// Exit code the CLI reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReplicateError::Config(_) | ReplicateError::Yaml(_) => EXIT_CONFIG_ERROR,
            ReplicateError::Connection { .. } => EXIT_CONNECTION_ERROR,
            ReplicateError::Query { .. }
            | ReplicateError::Http(_)
            | ReplicateError::Record(_)
            | ReplicateError::Json(_) => EXIT_QUERY_ERROR,
            ReplicateError::Submission(_) | ReplicateError::Process { .. } => {
                EXIT_SUBMISSION_ERROR
            }
            ReplicateError::Transfer { .. } => EXIT_TRANSFER_ERROR,
            ReplicateError::Io(_) => EXIT_IO_ERROR,
            ReplicateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicateError>;
