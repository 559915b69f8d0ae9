//! External process execution on the tokio runtime.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{ProcessOutput, ProcessRunner, ProcessSpec};
use crate::error::{ReplicateError, Result};

/// Spawns real child processes.
///
/// The child is killed if the run is cancelled while it is still running.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner {
    cancel: CancellationToken,
}

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).envs(&spec.env).kill_on_drop(true);

        match &spec.stdin {
            Some(path) => {
                let file = tokio::fs::File::open(path).await?.into_std().await;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        match &spec.stdout {
            Some(path) => {
                let file = tokio::fs::File::create(path).await?.into_std().await;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::piped());
            }
        }
        cmd.stderr(Stdio::piped());

        debug!(command = %spec.command_line(), "spawning process");
        let child = cmd
            .spawn()
            .map_err(|e| ReplicateError::process(&spec.program, e.to_string()))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ReplicateError::Cancelled),
            output = child.wait_with_output() => output
                .map_err(|e| ReplicateError::process(&spec.program, e.to_string()))?,
        };

        Ok(ProcessOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
