//! Lock-provider error type.

use thiserror::Error;

/// Errors returned by a [`crate::LockProvider`] operation.
#[derive(Debug, Error)]
pub enum LockError {
    /// `Lock` exhausted its retry budget without acquiring the record.
    #[error("timed out waiting for lock")]
    Timeout,

    /// The record is held by a different, unexpired owner.
    #[error("lock already held by another owner")]
    AlreadyExists,

    /// `Unlock`/`Refresh` targeted a record that doesn't exist, or whose
    /// current owner doesn't match the caller.
    #[error("lock record not found (or owner mismatch)")]
    NotFound,

    /// The record existed but had already expired when observed.
    #[error("lock record expired")]
    Expired,

    /// A workflow-execution lock is already held elsewhere; this is a
    /// distinct *non-error* signal at the `WorkflowLockProvider` layer —
    /// callers there should treat it as "skip, don't fail".
    #[error("workflow execution already running elsewhere")]
    AlreadyRunning,

    /// Genuine backend/infrastructure failure (connection error, etc).
    #[error("lock backend error: {0}")]
    Backend(#[from] anyhow::Error),
}
