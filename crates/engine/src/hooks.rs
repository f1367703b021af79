//! Task lifecycle hooks, fanned out in declaration order by the executor.
//!
//! A hook returning an error is logged and does not stop the remaining
//! hooks from running — one misbehaving hook must not silence the rest.

use async_trait::async_trait;
use tasks::{Task, TaskContext, TaskError, TaskOutput};

#[async_trait]
pub trait Hook: Send + Sync {
    async fn on_running(&self, _task: &dyn Task, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_success(&self, _task: &dyn Task, _output: &TaskOutput) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_failure(&self, _task: &dyn Task, _error: &TaskError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs a line per transition; the default hook the executor is
/// constructed with when the caller supplies none of its own.
pub struct TracingHook;

#[async_trait]
impl Hook for TracingHook {
    async fn on_running(&self, task: &dyn Task, _ctx: &TaskContext) -> anyhow::Result<()> {
        tracing::info!(task_id = task.id(), task_kind = task.kind(), "task running");
        Ok(())
    }

    async fn on_success(&self, task: &dyn Task, output: &TaskOutput) -> anyhow::Result<()> {
        tracing::info!(task_id = task.id(), duration = ?output.duration, "task succeeded");
        Ok(())
    }

    async fn on_failure(&self, task: &dyn Task, error: &TaskError) -> anyhow::Result<()> {
        tracing::warn!(task_id = task.id(), %error, "task failed");
        Ok(())
    }
}

pub(crate) async fn dispatch_running(hooks: &[std::sync::Arc<dyn Hook>], task: &dyn Task, ctx: &TaskContext) {
    for hook in hooks {
        if let Err(e) = hook.on_running(task, ctx).await {
            tracing::warn!(task_id = task.id(), error = %e, "on_running hook failed");
        }
    }
}

pub(crate) async fn dispatch_success(hooks: &[std::sync::Arc<dyn Hook>], task: &dyn Task, output: &TaskOutput) {
    for hook in hooks {
        if let Err(e) = hook.on_success(task, output).await {
            tracing::warn!(task_id = task.id(), error = %e, "on_success hook failed");
        }
    }
}

pub(crate) async fn dispatch_failure(hooks: &[std::sync::Arc<dyn Hook>], task: &dyn Task, error: &TaskError) {
    for hook in hooks {
        if let Err(e) = hook.on_failure(task, error).await {
            tracing::warn!(task_id = task.id(), error = %e, "on_failure hook failed");
        }
    }
}
