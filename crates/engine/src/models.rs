//! Persisted workflow template shape.
//!
//! These types are the source of truth for what a workflow template looks
//! like at rest. They serialize to/from the JSONB `definition` column of
//! the `workflows` table and are what the API and CLI hand to
//! [`crate::orchestrator::Orchestrator`] to bind into a runnable graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dag::{FailurePolicy, RunMode};

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Triggered by an incoming HTTP request to `/webhook/{path}`.
    Webhook { path: String },
    /// Triggered manually via the REST API.
    Manual,
    /// Triggered on a cron schedule.
    Cron { expression: String },
}

fn default_mode() -> RunMode {
    RunMode::Parallel
}

fn default_on_failure() -> FailurePolicy {
    FailurePolicy::Abort
}

fn default_max_retries() -> u32 {
    0
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// A single step in the workflow template. `node_type` is looked up in a
/// `tasks::TaskRegistry` at bind time to produce the runnable `Task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Maps to a registered `Task` implementation.
    pub node_type: String,
    /// Arbitrary configuration handed to the task factory.
    pub config: serde_json::Value,
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(default = "default_on_failure")]
    pub on_failure: FailurePolicy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config,
            mode: default_mode(),
            on_failure: default_on_failure(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// A complete workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub trigger: Trigger,
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        nodes: Vec<NodeDefinition>,
        edges: Vec<Edge>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            trigger,
            nodes,
            edges,
            created_at: Utc::now(),
        }
    }

    /// The dependencies of `node_id`: every `from` of an edge landing on it.
    pub fn deps_of(&self, node_id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.to == node_id)
            .map(|e| e.from.clone())
            .collect()
    }
}
