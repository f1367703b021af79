//! End-to-end scenarios exercising the full `Orchestrator` → `Graph` →
//! `Scheduler` → `TaskExecutor` pipeline, one per documented behavior.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use lock::{generate_owner, InMemoryLockProvider, WorkflowLockProvider};
use tasks::mock::MockTask;
use tasks::Task;

use tasks::TaskRegistry;

use crate::dag::{FailurePolicy, NodePolicy};
use crate::models::{Edge, NodeDefinition, Trigger, Workflow};
use crate::orchestrator::{bind, Definition, Orchestrator};
use crate::EngineError;

fn mock_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(
        "mock",
        Arc::new(|id, cfg| {
            if cfg.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
                Ok(Arc::new(MockTask::failing(id, "boom")) as Arc<dyn Task>)
            } else {
                Ok(Arc::new(MockTask::returning(id, json!({}))) as Arc<dyn Task>)
            }
        }),
    );
    registry
}

#[tokio::test]
async fn diamond_workflow_succeeds_end_to_end() {
    let workflow = Workflow::new(
        "diamond",
        Trigger::Manual,
        vec![
            NodeDefinition::new("a", "mock", json!({})),
            NodeDefinition::new("b", "mock", json!({})),
            NodeDefinition::new("c", "mock", json!({})),
            NodeDefinition::new("d", "mock", json!({})),
        ],
        vec![
            Edge { from: "a".into(), to: "b".into() },
            Edge { from: "a".into(), to: "c".into() },
            Edge { from: "b".into(), to: "d".into() },
            Edge { from: "c".into(), to: "d".into() },
        ],
    );

    let defs = bind(&workflow, &mock_registry()).unwrap();
    let orchestrator = Orchestrator::new(crate::executor::TaskExecutor::default(), 4);
    let result = orchestrator.execute(Uuid::new_v4(), defs, json!({})).await.unwrap();
    assert!(result.success);
    assert_eq!(result.per_task_results.len(), 4);
}

#[tokio::test]
async fn cycle_in_the_template_is_rejected_before_anything_runs() {
    let workflow = Workflow::new(
        "cycle",
        Trigger::Manual,
        vec![
            NodeDefinition::new("a", "mock", json!({})),
            NodeDefinition::new("b", "mock", json!({})),
        ],
        vec![
            Edge { from: "a".into(), to: "b".into() },
            Edge { from: "b".into(), to: "a".into() },
        ],
    );

    let defs = bind(&workflow, &mock_registry()).unwrap();
    let orchestrator = Orchestrator::new(crate::executor::TaskExecutor::default(), 4);
    let result = orchestrator.execute(Uuid::new_v4(), defs, json!({})).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("cycle"));
}

#[tokio::test]
async fn abort_policy_halts_the_remainder_of_the_run() {
    let workflow = Workflow::new(
        "abort",
        Trigger::Manual,
        vec![
            NodeDefinition::new("a", "mock", json!({"fail": true})),
            NodeDefinition::new("b", "mock", json!({})),
        ],
        vec![Edge { from: "a".into(), to: "b".into() }],
    );

    let defs = bind(&workflow, &mock_registry()).unwrap();
    let orchestrator = Orchestrator::new(crate::executor::TaskExecutor::default(), 4);
    let result = orchestrator.execute(Uuid::new_v4(), defs, json!({})).await.unwrap();
    assert!(!result.success);
    assert!(result.per_task_results.get("b").is_none());
}

#[tokio::test]
async fn skip_policy_lets_the_rest_of_the_dag_finish() {
    let defs = vec![
        Definition::new("a", Arc::new(MockTask::failing("a", "boom")) as Arc<dyn Task>).with_policy(NodePolicy {
            on_failure: FailurePolicy::Skip,
            ..Default::default()
        }),
        Definition::new("b", Arc::new(MockTask::returning("b", json!({}))) as Arc<dyn Task>).with_deps(vec!["a".into()]),
    ];

    let orchestrator = Orchestrator::new(crate::executor::TaskExecutor::default(), 4);
    let result = orchestrator.execute(Uuid::new_v4(), defs, json!({})).await.unwrap();
    assert!(result.success);
    assert!(result.per_task_results.contains_key("b"));
}

#[tokio::test]
async fn retry_policy_eventually_succeeds_on_a_flaky_task() {
    // Single node, max_retries=3, retry_delay=10ms; runner fails twice
    // then succeeds. The node's own policy drives the backoff, not the
    // orchestrator-wide default.
    let defs = vec![Definition::new(
        "flaky",
        Arc::new(MockTask::flaky("flaky", 2, json!({"done": true}))) as Arc<dyn Task>,
    )
    .with_policy(NodePolicy {
        max_retries: 3,
        retry_delay: std::time::Duration::from_millis(10),
        on_failure: FailurePolicy::Retry,
    })];

    let orchestrator = Orchestrator::new(crate::executor::TaskExecutor::default(), 4);
    let result = orchestrator.execute(Uuid::new_v4(), defs, json!({})).await.unwrap();
    assert!(result.success);
    let task_result = &result.per_task_results["flaky"];
    assert_eq!(task_result.retry_count, 2);
}

#[tokio::test]
async fn running_execution_id_is_rejected_until_released() {
    let backend = Arc::new(InMemoryLockProvider::new());
    let lock_a = Arc::new(WorkflowLockProvider::new(backend.clone(), generate_owner()));
    let lock_b = Arc::new(WorkflowLockProvider::new(backend, generate_owner()));

    let execution_id = Uuid::new_v4();
    lock_a.acquire_execution_lock(execution_id).await.unwrap();

    let orchestrator = Orchestrator::new(crate::executor::TaskExecutor::default(), 4).with_lock_provider(lock_b);
    let defs = vec![Definition::new(
        "only",
        Arc::new(MockTask::returning("only", json!({}))) as Arc<dyn Task>,
    )];
    let err = orchestrator.execute(execution_id, defs, json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning));

    lock_a.release_execution_lock(execution_id).await.unwrap();
}
