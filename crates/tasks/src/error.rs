//! Task-level error type.

use thiserror::Error;

/// Errors returned by a [`crate::Task`]'s `validate` or `execute` method.
///
/// `Validation` failures are never retried — `engine::TaskExecutor`
/// short-circuits on them before the retry loop even starts. `Failed`
/// carries whatever the task implementation raised; whether a `Failed`
/// error is retried is decided by the executor's retry predicate and the
/// node's failure policy, not by this type.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task's declarative validator rejected its own configuration.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The task ran and failed.
    #[error("{0}")]
    Failed(#[from] anyhow::Error),
}

impl TaskError {
    /// Convenience constructor for a `Failed` variant from a plain message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(anyhow::anyhow!(msg.into()))
    }
}
