//! `TaskExecutor` — validate, dispatch, retry, and report on one task.
//!
//! Sequence per call to [`TaskExecutor::run`]:
//! 1. `validate()` — a failure here is never retried.
//! 2. dispatch `OnRunning` hooks.
//! 3. race the retry loop against the caller's cancellation token.
//! 4. dispatch `OnSuccess`/`OnFailure` hooks with the terminal outcome.
//!
//! Each attempt inside the retry loop races the task's own `execute()`
//! against its declared timeout. Retry uses exponential backoff
//! (500ms initial, 2x multiplier, 10 attempts by default) gated by a
//! pluggable "is this retryable" predicate — validation failures are
//! never retried regardless of the predicate.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tasks::{Task, TaskContext, TaskError, TaskOutput};

use crate::hooks::{dispatch_failure, dispatch_running, dispatch_success, Hook};

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: 10,
        }
    }
}

/// Decides whether a given failure is worth retrying. Defaults to "retry
/// everything except validation failures", which the executor enforces
/// separately regardless of what this returns.
pub type RetryPredicate = Arc<dyn Fn(&TaskError) -> bool + Send + Sync>;

fn default_retryable() -> RetryPredicate {
    Arc::new(|_: &TaskError| true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TaskExecutionResult {
    pub status: TaskStatus,
    pub output: Option<TaskOutput>,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
}

impl TaskExecutionResult {
    fn success(output: TaskOutput, retry_count: u32) -> Self {
        Self {
            status: TaskStatus::Success,
            output: Some(output),
            failure_reason: None,
            retry_count,
        }
    }

    fn failed(reason: String, retry_count: u32) -> Self {
        Self {
            status: TaskStatus::Failed,
            output: None,
            failure_reason: Some(reason),
            retry_count,
        }
    }
}

#[derive(Clone)]
pub struct TaskExecutor {
    backoff: BackoffPolicy,
    retryable: RetryPredicate,
    hooks: Vec<Arc<dyn Hook>>,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            retryable: default_retryable(),
            hooks: Vec::new(),
        }
    }
}

impl TaskExecutor {
    pub fn new(backoff: BackoffPolicy, hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self {
            backoff,
            retryable: default_retryable(),
            hooks,
        }
    }

    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retryable = predicate;
        self
    }

    /// Override the backoff parameters, keeping hooks and retry predicate.
    /// Used per-node, to drive retries from a node's own `NodePolicy`
    /// rather than the orchestrator-wide default.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(
        &self,
        task: Arc<dyn Task>,
        ctx: TaskContext,
        cancel: CancellationToken,
    ) -> TaskExecutionResult {
        if let Err(e) = task.validate() {
            let reason = format!("validation failed: {e}");
            let err = TaskError::Validation(reason.clone());
            dispatch_failure(&self.hooks, task.as_ref(), &err).await;
            return TaskExecutionResult::failed(reason, 0);
        }

        dispatch_running(&self.hooks, task.as_ref(), &ctx).await;

        tokio::select! {
            _ = cancel.cancelled() => {
                let err = TaskError::failed("cancelled");
                dispatch_failure(&self.hooks, task.as_ref(), &err).await;
                TaskExecutionResult::failed("cancelled".into(), 0)
            }
            result = self.retry_loop(task.clone(), ctx, cancel.clone()) => {
                match result {
                    Ok((output, retries)) => {
                        dispatch_success(&self.hooks, task.as_ref(), &output).await;
                        TaskExecutionResult::success(output, retries)
                    }
                    Err((err, retries)) => {
                        dispatch_failure(&self.hooks, task.as_ref(), &err).await;
                        TaskExecutionResult::failed(err.to_string(), retries)
                    }
                }
            }
        }
    }

    async fn retry_loop(
        &self,
        task: Arc<dyn Task>,
        ctx: TaskContext,
        cancel: CancellationToken,
    ) -> Result<(TaskOutput, u32), (TaskError, u32)> {
        let mut delay = self.backoff.initial_delay;
        let mut attempt = 0u32;

        loop {
            let timeout = task.timeout();
            let attempt_result = tokio::select! {
                res = tokio::time::timeout(timeout, task.execute(&ctx)) => res,
                _ = cancel.cancelled() => return Err((TaskError::failed("cancelled"), attempt)),
            };

            match attempt_result {
                Err(_elapsed) => {
                    if attempt >= self.backoff.max_retries {
                        return Err((TaskError::failed("timed out"), attempt));
                    }
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, &self.backoff);
                }
                Ok(Ok(output)) => return Ok((output, attempt)),
                Ok(Err(e)) => {
                    let retryable = !matches!(e, TaskError::Validation(_)) && (self.retryable)(&e);
                    if !retryable || attempt >= self.backoff.max_retries {
                        return Err((e, attempt));
                    }
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, &self.backoff);
                }
            }
        }
    }
}

fn next_delay(current: Duration, backoff: &BackoffPolicy) -> Duration {
    let scaled = current.mul_f64(backoff.multiplier);
    scaled.min(backoff.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasks::mock::MockTask;

    fn ctx() -> TaskContext {
        TaskContext {
            execution_id: uuid::Uuid::new_v4(),
            order_id: "node-1".into(),
            input: json!({}),
            secrets: Default::default(),
        }
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_retries: 5,
        }
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_without_retry() {
        let executor = TaskExecutor::new(fast_backoff(), Vec::new());
        let task = Arc::new(MockTask::failing_validation("bad-task", "bad"));
        let result = executor.run(task, ctx(), CancellationToken::new()).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn flaky_task_succeeds_within_retry_budget() {
        let executor = TaskExecutor::new(fast_backoff(), Vec::new());
        let task = Arc::new(MockTask::flaky("flaky", 2, json!({"ok": true})));
        let result = executor.run(task, ctx(), CancellationToken::new()).await;
        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.retry_count, 2);
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_failure() {
        let mut backoff = fast_backoff();
        backoff.max_retries = 1;
        let executor = TaskExecutor::new(backoff, Vec::new());
        let task = Arc::new(MockTask::flaky("flaky", 5, json!({"ok": true})));
        let result = executor.run(task, ctx(), CancellationToken::new()).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.retry_count, 1);
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_short_circuits() {
        let executor = TaskExecutor::new(fast_backoff(), Vec::new());
        let task = Arc::new(MockTask::returning("slow", json!({})));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor.run(task, ctx(), cancel).await;
        assert_eq!(result.status, TaskStatus::Failed);
    }
}
