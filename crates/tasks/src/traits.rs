//! The `Task` trait — the contract every task kind must fulfil.
//!
//! This is the richer of the two vocabularies the source system carried
//! (a low-level nullary "step runner" keyed by type string, and a richer
//! Task abstraction with validation and metadata). The workspace unifies
//! on this trait; [`crate::registry::TaskRegistry`] is the thin adapter
//! that resolves a `node_type` string to an `Arc<dyn Task>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::TaskError;

/// Context threaded into every task invocation.
///
/// Defined here (in the `tasks` crate) so both `engine` and individual
/// task implementations can depend on it without a circular dependency.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// ID of the parent workflow execution.
    pub execution_id: Uuid,
    /// ID of the graph node this invocation belongs to.
    pub order_id: String,
    /// Output of the node's predecessor(s), or the execution's initial
    /// input for a root node.
    pub input: Value,
    /// Decrypted secrets scoped to this workflow.
    pub secrets: HashMap<String, String>,
}

/// The result of one task invocation, independent of success or failure.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub task_id: String,
    pub output: Value,
    pub error_text: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub metadata: HashMap<String, Value>,
}

impl TaskOutput {
    pub fn success(task_id: impl Into<String>, output: Value, started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        let duration = (finished_at - started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Self {
            task_id: task_id.into(),
            output,
            error_text: None,
            started_at,
            finished_at,
            duration,
            metadata: HashMap::new(),
        }
    }
}

/// The core task trait. HTTP calls, shell scripts, and user functions are
/// distinct implementations of this trait, not variants of a tagged union.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable identifier, unique within the owning workflow.
    fn id(&self) -> &str;

    /// Human-readable label.
    fn name(&self) -> &str;

    /// The task kind, e.g. `"http"`, `"shell"`, `"function"`.
    fn kind(&self) -> &str;

    /// Per-attempt timeout. Defaults to 30s per the platform-wide default;
    /// adapters that need a different default (shell tasks default to 60s)
    /// override it.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Declarative, side-effect-free validation of the task's own
    /// configuration. Called once before the first attempt; failures here
    /// are never retried.
    fn validate(&self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Execute the task once. Implementations must honor
    /// `tokio::select!`-style cooperative cancellation by awaiting only
    /// cancellation-safe futures; the caller races this future against a
    /// deadline and a cancellation token.
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskError>;
}
