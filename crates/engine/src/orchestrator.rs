//! `Orchestrator` — binds a workflow template to a runnable graph, takes
//! the execution lock, runs the scheduler, and collects the result.
//!
//! `Execute` proceeds: validate → lock → bind → schedule → collect. The
//! execution lock is released on every exit path, including validation
//! failures after the lock was already taken and panics inside the
//! scheduler (the `Drop` of the async block is not relied upon; release
//! happens explicitly in a `finally`-style tail regardless of which
//! branch produced the result).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lock::{LockError, WorkflowLockProvider};
use tasks::{Task, TaskContext, TaskRegistry};

use crate::dag::{Graph, NodeDescriptor, NodePolicy, RunMode};
use crate::error::RunnerFailure;
use crate::executor::{BackoffPolicy, TaskExecutionResult, TaskExecutor};
use crate::models::Workflow;
use crate::scheduler::{RunOutcome, Scheduler};
use crate::EngineError;

/// One task bound into a graph node, the unit the orchestrator accepts.
pub struct Definition {
    pub id: String,
    pub task: Arc<dyn Task>,
    pub deps: Vec<String>,
    pub mode: RunMode,
    pub policy: NodePolicy,
}

impl std::fmt::Debug for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Definition")
            .field("id", &self.id)
            .field("deps", &self.deps)
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Definition {
    pub fn new(id: impl Into<String>, task: Arc<dyn Task>) -> Self {
        Self {
            id: id.into(),
            task,
            deps: Vec::new(),
            mode: RunMode::Parallel,
            policy: NodePolicy::default(),
        }
    }

    pub fn with_deps(mut self, deps: Vec<String>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// One row of a persistence callback's feed — fired as each task
/// transitions, best-effort (a callback error is logged and does not
/// fail the run).
pub struct StepTransition {
    pub execution_id: Uuid,
    pub step_id: String,
    pub result: Option<TaskExecutionResult>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistenceCallback: Send + Sync {
    async fn on_step_transition(&self, event: StepTransition) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    pub per_task_results: HashMap<String, TaskExecutionResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

pub struct Orchestrator {
    executor: TaskExecutor,
    lock_provider: Option<Arc<WorkflowLockProvider>>,
    persistence: Option<Arc<dyn PersistenceCallback>>,
    max_workers: usize,
}

impl Orchestrator {
    pub fn new(executor: TaskExecutor, max_workers: usize) -> Self {
        Self {
            executor,
            lock_provider: None,
            persistence: None,
            max_workers,
        }
    }

    pub fn with_lock_provider(mut self, provider: Arc<WorkflowLockProvider>) -> Self {
        self.lock_provider = Some(provider);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceCallback>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Run one execution end to end with a fresh, caller-inaccessible
    /// cancellation token. Most callers (tests, embedded use) want this.
    pub async fn execute(
        &self,
        execution_id: Uuid,
        definitions: Vec<Definition>,
        initial_input: Value,
    ) -> Result<ExecutionResult, EngineError> {
        self.execute_cancellable(execution_id, definitions, initial_input, CancellationToken::new())
            .await
    }

    /// Run one execution end to end against a cancellation token the
    /// caller retains — e.g. an HTTP server keeping a map of
    /// `execution_id -> CancellationToken` so a later `POST .../cancel`
    /// can reach a still-running orchestration.
    pub async fn execute_cancellable(
        &self,
        execution_id: Uuid,
        definitions: Vec<Definition>,
        initial_input: Value,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        self.validate(&definitions)?;

        if let Some(lock) = &self.lock_provider {
            lock.acquire_execution_lock(execution_id).await.map_err(|e| match e {
                LockError::AlreadyRunning => EngineError::AlreadyRunning,
                other => EngineError::Lock(other),
            })?;
        }

        let result = self.run_bound(execution_id, definitions, initial_input, cancel).await;

        if let Some(lock) = &self.lock_provider {
            let _ = lock.release_execution_lock(execution_id).await;
        }

        result
    }

    fn validate(&self, definitions: &[Definition]) -> Result<(), EngineError> {
        if definitions.is_empty() {
            return Err(EngineError::Validation("no task definitions provided".into()));
        }
        let mut seen = HashSet::new();
        for d in definitions {
            if !seen.insert(d.id.clone()) {
                return Err(EngineError::Validation(format!("duplicate id '{}'", d.id)));
            }
            d.task
                .validate()
                .map_err(|e| EngineError::Validation(format!("task '{}': {e}", d.id)))?;
        }
        let ids: HashSet<&str> = definitions.iter().map(|d| d.id.as_str()).collect();
        for d in definitions {
            for dep in &d.deps {
                if !dep.trim().is_empty() && !ids.contains(dep.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "unknown dependency '{dep}' for '{}'",
                        d.id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn run_bound(
        &self,
        execution_id: Uuid,
        definitions: Vec<Definition>,
        initial_input: Value,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let started_at = Utc::now();
        let results: Arc<Mutex<HashMap<String, TaskExecutionResult>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut descriptors = Vec::with_capacity(definitions.len());
        for d in definitions {
            let task = d.task.clone();
            // Each node retries on its own `max_retries`/`retry_delay`
            // rather than the orchestrator-wide default: a constant delay
            // (multiplier 1.0) between attempts, bounded by the node's
            // own budget.
            let executor = self.executor.clone().with_backoff(BackoffPolicy {
                initial_delay: d.policy.retry_delay,
                max_delay: d.policy.retry_delay,
                multiplier: 1.0,
                max_retries: d.policy.max_retries,
            });
            let results = results.clone();
            let persistence = self.persistence.clone();
            let node_id = d.id.clone();
            let cancel_cl = cancel.clone();
            let input = initial_input.clone();

            let runner = Arc::new(move || {
                let task = task.clone();
                let executor = executor.clone();
                let results = results.clone();
                let persistence = persistence.clone();
                let node_id = node_id.clone();
                let cancel_cl = cancel_cl.clone();
                let ctx = TaskContext {
                    execution_id,
                    order_id: node_id.clone(),
                    input: input.clone(),
                    secrets: HashMap::new(),
                };
                Box::pin(async move {
                    let outcome = executor.run(task, ctx, cancel_cl).await;
                    let failure = outcome.failure_reason.clone();
                    let retry_count = outcome.retry_count;
                    results.lock().unwrap().insert(node_id.clone(), outcome.clone());
                    if let Some(cb) = &persistence {
                        let _ = cb
                            .on_step_transition(StepTransition {
                                execution_id,
                                step_id: node_id.clone(),
                                result: Some(outcome),
                                at: Utc::now(),
                            })
                            .await;
                    }
                    match failure {
                        None => Ok(()),
                        Some(message) => Err(anyhow::Error::new(RunnerFailure { message, retry_count })),
                    }
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
            });

            descriptors.push(
                NodeDescriptor::new(d.id, d.mode)
                    .with_deps(d.deps)
                    .with_runner(runner)
                    .with_policy(d.policy),
            );
        }

        let run_result = match Graph::build(descriptors) {
            Ok(graph) => Scheduler::new(self.max_workers).run(Arc::new(graph), HashSet::new(), cancel).await,
            Err(e) => Err(e),
        };

        let finished_at = Utc::now();
        let duration = (finished_at - started_at).to_std().unwrap_or_default();
        let per_task_results = Arc::try_unwrap(results)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_default();

        match run_result {
            Ok(RunOutcome::Success) => Ok(ExecutionResult {
                execution_id,
                success: true,
                error: None,
                per_task_results,
                started_at,
                finished_at,
                duration,
            }),
            Ok(RunOutcome::ReportedFailures) => Ok(ExecutionResult {
                execution_id,
                success: false,
                error: Some("dag executed with skipped failures".into()),
                per_task_results,
                started_at,
                finished_at,
                duration,
            }),
            Err(e) => Ok(ExecutionResult {
                execution_id,
                success: false,
                error: Some(e.to_string()),
                per_task_results,
                started_at,
                finished_at,
                duration,
            }),
        }
    }
}

/// Resolve a persisted [`Workflow`] template's nodes through `registry`
/// into runnable [`Definition`]s, carrying over each node's mode and
/// failure policy.
pub fn bind(workflow: &Workflow, registry: &TaskRegistry) -> Result<Vec<Definition>, EngineError> {
    let mut defs = Vec::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        let task = registry
            .build(&node.id, &node.node_type, &node.config)
            .map_err(|e| EngineError::Validation(format!("node '{}': {e}", node.id)))?;
        let policy = NodePolicy {
            max_retries: node.max_retries,
            retry_delay: Duration::from_millis(node.retry_delay_ms),
            on_failure: node.on_failure,
        };
        defs.push(
            Definition::new(node.id.clone(), task)
                .with_deps(workflow.deps_of(&node.id))
                .with_mode(node.mode)
                .with_policy(policy),
        );
    }
    Ok(defs)
}

/// A chain of tasks, each depending on the previous, all `SERIAL`.
pub fn simple_workflow(tasks: Vec<Arc<dyn Task>>) -> Vec<Definition> {
    let mut defs = Vec::with_capacity(tasks.len());
    let mut prev: Option<String> = None;
    for task in tasks {
        let id = task.id().to_string();
        let mut def = Definition::new(id.clone(), task).with_mode(RunMode::Serial);
        if let Some(p) = prev {
            def = def.with_deps(vec![p]);
        }
        prev = Some(id);
        defs.push(def);
    }
    defs
}

/// Independent tasks with no dependencies between them, all `PARALLEL`.
pub fn parallel_workflow(tasks: Vec<Arc<dyn Task>>) -> Vec<Definition> {
    tasks
        .into_iter()
        .map(|task| {
            let id = task.id().to_string();
            Definition::new(id, task).with_mode(RunMode::Parallel)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasks::mock::MockTask;

    #[tokio::test]
    async fn duplicate_execution_is_rejected_by_the_workflow_lock() {
        let backend = Arc::new(lock::InMemoryLockProvider::new());
        let lock_a = Arc::new(WorkflowLockProvider::new(backend.clone(), lock::generate_owner()));
        let lock_b = Arc::new(WorkflowLockProvider::new(backend, lock::generate_owner()));

        let orchestrator_a = Orchestrator::new(TaskExecutor::default(), 4).with_lock_provider(lock_a);
        let orchestrator_b = Orchestrator::new(TaskExecutor::default(), 4).with_lock_provider(lock_b);

        let execution_id = Uuid::new_v4();
        let slow_defs = vec![Definition::new(
            "only",
            Arc::new(MockTask::returning("only", json!({}))) as Arc<dyn Task>,
        )];
        let dup_defs = vec![Definition::new(
            "only",
            Arc::new(MockTask::returning("only", json!({}))) as Arc<dyn Task>,
        )];

        // Acquire directly through the lock (bypassing execution) to
        // simulate "already running elsewhere" without racing a real run.
        orchestrator_a
            .lock_provider
            .as_ref()
            .unwrap()
            .acquire_execution_lock(execution_id)
            .await
            .unwrap();

        let err = orchestrator_b.execute(execution_id, dup_defs, json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning));

        orchestrator_a
            .lock_provider
            .as_ref()
            .unwrap()
            .release_execution_lock(execution_id)
            .await
            .unwrap();

        drop(slow_defs);
    }

    #[tokio::test]
    async fn simple_workflow_runs_all_tasks_to_success() {
        let orchestrator = Orchestrator::new(TaskExecutor::default(), 4);
        let tasks: Vec<Arc<dyn Task>> = vec![
            Arc::new(MockTask::returning("first", json!({}))),
            Arc::new(MockTask::returning("second", json!({}))),
        ];
        let defs = simple_workflow(tasks);
        let result = orchestrator.execute(Uuid::new_v4(), defs, json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.per_task_results.len(), 2);
    }

    #[tokio::test]
    async fn empty_definitions_are_rejected() {
        let orchestrator = Orchestrator::new(TaskExecutor::default(), 4);
        let err = orchestrator.execute(Uuid::new_v4(), vec![], json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn bind_resolves_node_types_through_the_registry_and_carries_deps() {
        use crate::models::{Edge, NodeDefinition, Trigger};

        let mut registry = TaskRegistry::new();
        registry.register(
            "mock",
            Arc::new(|id, _cfg| Ok(Arc::new(MockTask::returning(id, json!({}))) as Arc<dyn Task>)),
        );

        let workflow = Workflow::new(
            "demo",
            Trigger::Manual,
            vec![
                NodeDefinition::new("a", "mock", json!({})),
                NodeDefinition::new("b", "mock", json!({})),
            ],
            vec![Edge { from: "a".into(), to: "b".into() }],
        );

        let defs = bind(&workflow, &registry).unwrap();
        assert_eq!(defs.len(), 2);
        let b = defs.iter().find(|d| d.id == "b").unwrap();
        assert_eq!(b.deps, vec!["a".to_string()]);
    }

    #[test]
    fn bind_surfaces_unregistered_node_type_as_validation_error() {
        let registry = TaskRegistry::new();
        let workflow = Workflow::new(
            "demo",
            crate::models::Trigger::Manual,
            vec![crate::models::NodeDefinition::new("a", "missing", json!({}))],
            vec![],
        );
        let err = bind(&workflow, &registry).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
