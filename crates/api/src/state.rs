//! Shared axum application state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use db::DbPool;
use engine::Orchestrator;
use tasks::TaskRegistry;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Cancellation handles for executions currently in flight, keyed by
/// execution id, so `POST /executions/:id/cancel` can reach a run
/// started by an earlier `POST /executions/:id/start`.
pub type RunningExecutions = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub registry: Arc<TaskRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub running: RunningExecutions,
}

impl AppState {
    pub fn new(pool: DbPool, registry: TaskRegistry, orchestrator: Orchestrator) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            orchestrator: Arc::new(orchestrator),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}
