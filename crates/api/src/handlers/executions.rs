use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use db::repository::{executions as exec_repo, workflows as wf_repo};
use engine::Workflow;

use super::AppState;

#[derive(serde::Deserialize)]
pub struct CreateExecutionDto {
    pub workflow_id: Uuid,
}

#[derive(serde::Deserialize)]
pub struct StartExecutionDto {
    #[serde(default)]
    pub input: Value,
}

/// `POST /executions` — create a `pending` execution record against a
/// workflow template. Does not run anything yet.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateExecutionDto>,
) -> Result<(StatusCode, Json<db::models::WorkflowExecutionRow>), StatusCode> {
    // Fail fast if the template doesn't exist — there's nothing to start later.
    wf_repo::get_workflow(&state.pool, payload.workflow_id)
        .await
        .map_err(|e| map_db_error(e))?;

    let exec = exec_repo::create_execution(&state.pool, payload.workflow_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(exec)))
}

/// `GET /executions/:id` — current status of one execution.
pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<db::models::WorkflowExecutionRow>, StatusCode> {
    exec_repo::get_execution(&state.pool, id).await.map(Json).map_err(map_db_error)
}

/// `POST /executions/:id/start` — bind the owning workflow's template
/// through the task registry and run it to completion in the
/// background; the caller polls `GET /executions/:id` for the result.
pub async fn start(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<StartExecutionDto>,
) -> Result<StatusCode, StatusCode> {
    let exec = exec_repo::get_execution(&state.pool, id).await.map_err(map_db_error)?;
    let wf_row = wf_repo::get_workflow(&state.pool, exec.workflow_id).await.map_err(map_db_error)?;
    let workflow: Workflow = serde_json::from_value(wf_row.definition).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let defs = engine::bind(&workflow, &state.registry).map_err(|_| StatusCode::BAD_REQUEST)?;

    spawn_run(&state, id, defs, payload.input).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Bind a workflow's nodes and run it to completion in the background,
/// tracking the run's cancellation token under `execution_id` and
/// persisting the terminal status once it finishes. Shared by `start`
/// and the webhook trigger, which differ only in how they arrive at an
/// `execution_id` and `Definition` list.
pub(crate) async fn spawn_run(
    state: &AppState,
    execution_id: Uuid,
    defs: Vec<engine::Definition>,
    input: Value,
) -> Result<(), StatusCode> {
    let cancel = CancellationToken::new();
    state.running.lock().unwrap().insert(execution_id, cancel.clone());

    exec_repo::update_execution_status(&state.pool, execution_id, "running", false)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let orchestrator = state.orchestrator.clone();
    let pool = state.pool.clone();
    let running = state.running.clone();

    tokio::spawn(async move {
        let result = orchestrator.execute_cancellable(execution_id, defs, input, cancel).await;
        running.lock().unwrap().remove(&execution_id);

        let status = match result {
            Ok(r) if r.success => "succeeded",
            _ => "failed",
        };
        if let Err(e) = exec_repo::update_execution_status(&pool, execution_id, status, true).await {
            tracing::warn!(%execution_id, error = %e, "failed to persist terminal execution status");
        }
    });

    Ok(())
}

/// `POST /executions/:id/cancel` — cooperative cancellation of a
/// currently-running execution. A no-op (but still `204`) if the
/// execution already finished or was never started.
pub async fn cancel(Path(id): Path<Uuid>, State(state): State<AppState>) -> StatusCode {
    if let Some(token) = state.running.lock().unwrap().get(&id) {
        token.cancel();
    }
    StatusCode::NO_CONTENT
}

fn map_db_error(e: db::DbError) -> StatusCode {
    match e {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
