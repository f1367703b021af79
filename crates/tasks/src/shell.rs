//! `ShellTask` — runs one command via the OS shell.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::process::Command;

use crate::{Task, TaskContext, TaskError, TaskOutput};

/// One shell command invocation, run to completion with `program` and
/// `args`. Shell tasks default to a 60s timeout (longer than the
/// platform-wide 30s default) since processes commonly outlive a single
/// HTTP round-trip.
#[derive(Debug, Clone)]
pub struct ShellTask {
    id: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ShellTask {
    pub fn new(id: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Task for ShellTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        "shell"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.program.trim().is_empty() {
            return Err(TaskError::Validation("shell task program must not be empty".into()));
        }
        Ok(())
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
        let started_at = Utc::now();

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| TaskError::failed(format!("failed to spawn '{}': {e}", self.program)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(TaskError::failed(format!(
                "command '{}' exited with {}: {stderr}",
                self.program, output.status
            )));
        }

        Ok(TaskOutput::success(
            self.id.clone(),
            json!({ "stdout": stdout, "stderr": stderr }),
            started_at,
        ))
    }
}
