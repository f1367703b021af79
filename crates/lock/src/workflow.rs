//! `WorkflowLockProvider` — wraps any [`LockProvider`] with the
//! workspace's conventional key scheme for execution and template locks.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::{DistributedLock, LockError, LockProvider};

const EXECUTION_TTL: Duration = Duration::from_secs(5 * 60);
const TEMPLATE_TTL: Duration = Duration::from_secs(10 * 60);
const TEMPLATE_RETRIES: u32 = 2;
const TEMPLATE_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct WorkflowLockProvider {
    inner: Arc<dyn LockProvider>,
    owner: String,
}

impl WorkflowLockProvider {
    pub fn new(inner: Arc<dyn LockProvider>, owner: String) -> Self {
        Self { inner, owner }
    }

    fn execution_key(execution_id: Uuid) -> String {
        format!("workflow_execution:{execution_id}")
    }

    fn template_key(template_id: Uuid) -> String {
        format!("workflow_template:{template_id}")
    }

    /// Acquire the per-execution lock. `retries = 0`: a duplicate attempt
    /// surfaces immediately as [`LockError::AlreadyRunning`], not a
    /// generic failure — callers should skip, not error.
    pub async fn acquire_execution_lock(&self, execution_id: Uuid) -> Result<DistributedLock, LockError> {
        self.inner
            .lock(&Self::execution_key(execution_id), &self.owner, EXECUTION_TTL, 0, Duration::ZERO)
            .await
            .map_err(|e| match e {
                LockError::AlreadyExists => LockError::AlreadyRunning,
                other => other,
            })
    }

    pub async fn release_execution_lock(&self, execution_id: Uuid) -> Result<(), LockError> {
        self.inner.unlock(&Self::execution_key(execution_id), &self.owner).await
    }

    /// Acquire the per-template lock, tolerating brief contention with a
    /// couple of retries (templates are edited far less often than
    /// executions start, so a short wait is worth it).
    pub async fn acquire_template_lock(&self, template_id: Uuid) -> Result<DistributedLock, LockError> {
        self.inner
            .lock(
                &Self::template_key(template_id),
                &self.owner,
                TEMPLATE_TTL,
                TEMPLATE_RETRIES,
                TEMPLATE_RETRY_DELAY,
            )
            .await
    }

    pub async fn release_template_lock(&self, template_id: Uuid) -> Result<(), LockError> {
        self.inner.unlock(&Self::template_key(template_id), &self.owner).await
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLockProvider;
    use crate::owner::generate_owner;

    #[tokio::test]
    async fn duplicate_execution_lock_reports_already_running() {
        let backend = Arc::new(InMemoryLockProvider::new());
        let a = WorkflowLockProvider::new(backend.clone(), generate_owner());
        let b = WorkflowLockProvider::new(backend, generate_owner());

        let execution_id = Uuid::new_v4();
        a.acquire_execution_lock(execution_id).await.expect("first caller wins");

        let err = b.acquire_execution_lock(execution_id).await.unwrap_err();
        assert!(matches!(err, LockError::AlreadyRunning));
    }

    #[tokio::test]
    async fn release_then_reacquire_by_another_owner_succeeds() {
        let backend = Arc::new(InMemoryLockProvider::new());
        let a = WorkflowLockProvider::new(backend.clone(), generate_owner());
        let b = WorkflowLockProvider::new(backend, generate_owner());

        let execution_id = Uuid::new_v4();
        a.acquire_execution_lock(execution_id).await.unwrap();
        a.release_execution_lock(execution_id).await.unwrap();

        b.acquire_execution_lock(execution_id).await.expect("now free");
    }
}
