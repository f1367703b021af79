use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use db::repository::{executions as exec_repo, workflows as wf_repo};
use engine::Workflow;

use super::executions::spawn_run;
use super::AppState;

/// `POST /webhook/:path` — find the workflow template whose trigger is a
/// `Webhook` with this path, create an execution, and run it in the
/// background with the request body as the initial input.
pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let workflows = wf_repo::list_workflows(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let matched = workflows.into_iter().find_map(|row| {
        let workflow: Workflow = serde_json::from_value(row.definition.clone()).ok()?;
        match &workflow.trigger {
            engine::Trigger::Webhook { path: trigger_path } if trigger_path == &path => {
                Some((row, workflow))
            }
            _ => None,
        }
    });

    let (wf_row, workflow) = matched.ok_or(StatusCode::NOT_FOUND)?;

    let defs = engine::bind(&workflow, &state.registry).map_err(|_| StatusCode::BAD_REQUEST)?;
    let exec = exec_repo::create_execution(&state.pool, wf_row.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    spawn_run(&state, exec.id, defs, payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "execution_id": exec.id })),
    ))
}
