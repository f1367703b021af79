//! Bridges `engine`'s persistence-agnostic `PersistenceCallback` hook to
//! the `db` crate's `step_executions` table.
//!
//! `engine` has no dependency on `db` — this is the seam where the two
//! meet, and it lives here rather than in either crate so neither has to
//! know about the other.

use async_trait::async_trait;

use db::repository::executions as exec_repo;
use db::DbPool;
use engine::{PersistenceCallback, StepTransition, TaskStatus};

pub struct DbPersistence {
    pool: DbPool,
}

impl DbPersistence {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceCallback for DbPersistence {
    async fn on_step_transition(&self, event: StepTransition) -> anyhow::Result<()> {
        let Some(result) = event.result else {
            return Ok(());
        };

        let status = match result.status {
            TaskStatus::Success => "succeeded",
            TaskStatus::Failed => "failed",
        };
        // The executor reports only the terminal outcome, not the input
        // that produced it — the step's input lives in the preceding
        // node's output, which `step_executions` doesn't duplicate.
        let input = serde_json::Value::Null;
        let output = result.output.as_ref().map(|o| o.output.clone());
        let started_at = result
            .output
            .as_ref()
            .map(|o| o.started_at)
            .unwrap_or(event.at);

        exec_repo::insert_step_execution(
            &self.pool,
            event.execution_id,
            &event.step_id,
            input,
            output,
            status,
            result.retry_count as i32,
            started_at,
        )
        .await?;

        Ok(())
    }
}
