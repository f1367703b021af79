//! Engine-level error types.

use thiserror::Error;

/// A runner's failure reason plus the retry attempts already made,
/// wrapped so it survives the `Runner` closure's `anyhow::Error` return
/// type. The scheduler downcasts to this to report an accurate
/// `retry_count` on `EngineError::TaskFailed`; any other error carries
/// `retry_count: 0`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RunnerFailure {
    pub message: String,
    pub retry_count: u32,
}

/// Errors produced by the workflow engine — graph construction, scheduling,
/// task execution, and orchestration.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Graph / validation errors ------
    #[error("validation error: {0}")]
    Validation(String),

    #[error("duplicate node id: '{0}'")]
    DuplicateNodeId(String),

    #[error("unknown dependency '{dep}' referenced by node '{node_id}'")]
    UnknownDependency { node_id: String, dep: String },

    #[error("node '{0}' depends on itself")]
    SelfLoop(String),

    #[error("graph contains a cycle: {path:?}")]
    Cycle { path: Vec<String> },

    #[error("node '{0}' not found in graph")]
    NodeNotFound(String),

    // ------ Execution errors ------
    #[error("task '{node_id}' failed after {retry_count} attempt(s): {message}")]
    TaskFailed {
        node_id: String,
        message: String,
        retry_count: u32,
    },

    #[error("execution was cancelled")]
    Cancelled,

    #[error("{0}")]
    Reported(String),

    // ------ Coordination errors ------
    #[error("workflow execution already running elsewhere")]
    AlreadyRunning,

    #[error(transparent)]
    Lock(#[from] lock::LockError),

    // ------ Internal ------
    #[error("internal invariant violation: {0}")]
    Internal(String),
}
