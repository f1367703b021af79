//! Workflow-execution and step-execution repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{StepExecutionRow, WorkflowExecutionRow},
    DbError,
};

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Create a new workflow execution record in `pending` status.
pub async fn create_execution(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<WorkflowExecutionRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        WorkflowExecutionRow,
        r#"
        INSERT INTO workflow_executions (id, workflow_id, status, started_at)
        VALUES ($1, $2, 'pending', $3)
        RETURNING id, workflow_id, status, started_at, finished_at
        "#,
        id,
        workflow_id,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow execution by its primary key.
pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowExecutionRow,
        r#"SELECT id, workflow_id, status, started_at, finished_at FROM workflow_executions WHERE id = $1"#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Update the `status` (and optionally `finished_at`) of a workflow execution.
pub async fn update_execution_status(
    pool: &PgPool,
    execution_id: Uuid,
    status: &str,
    finished: bool,
) -> Result<(), DbError> {
    if finished {
        sqlx::query!(
            r#"
            UPDATE workflow_executions
            SET status = $1, finished_at = $2
            WHERE id = $3
            "#,
            status,
            Utc::now(),
            execution_id,
        )
        .execute(pool)
        .await?;
    } else {
        sqlx::query!(
            r#"UPDATE workflow_executions SET status = $1 WHERE id = $2"#,
            status,
            execution_id,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// step_executions
// ---------------------------------------------------------------------------

/// Insert a completed step execution record. Called from an
/// `engine::PersistenceCallback` as each node transitions to a terminal
/// state.
#[allow(clippy::too_many_arguments)]
pub async fn insert_step_execution(
    pool: &PgPool,
    execution_id: Uuid,
    step_id: &str,
    input: serde_json::Value,
    output: Option<serde_json::Value>,
    status: &str,
    retry_count: i32,
    started_at: chrono::DateTime<Utc>,
) -> Result<StepExecutionRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        StepExecutionRow,
        r#"
        INSERT INTO step_executions
            (id, execution_id, step_id, input, output, status, retry_count, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, execution_id, step_id, input, output, status, retry_count, started_at, finished_at
        "#,
        id,
        execution_id,
        step_id,
        input,
        output,
        status,
        retry_count,
        started_at,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// All step executions recorded for one workflow execution, oldest first.
pub async fn list_step_executions(pool: &PgPool, execution_id: Uuid) -> Result<Vec<StepExecutionRow>, DbError> {
    let rows = sqlx::query_as!(
        StepExecutionRow,
        r#"
        SELECT id, execution_id, step_id, input, output, status, retry_count, started_at, finished_at
        FROM step_executions
        WHERE execution_id = $1
        ORDER BY started_at ASC
        "#,
        execution_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
