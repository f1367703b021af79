//! Layered concurrent scheduler.
//!
//! Drains the graph's cached layers one at a time. Within a layer, nodes
//! dispatch onto a bounded worker pool (a semaphore sized `max_workers`);
//! a `SERIAL` node blocks dispatch of the remainder of its own layer until
//! every unit spawned so far — including itself — has finished, i.e. it
//! drains the pool's current fan-out before letting the layer continue.
//!
//! A node's runner error is classified by its `NodePolicy::on_failure`:
//! `Abort` sets the graph's global failure atom and cancels the shared
//! token so every other in-flight and not-yet-dispatched node stops;
//! `Skip`/`SkipButReport` record the node as `Failed` but let dependents
//! proceed as if it had succeeded; `Retry` has already been exhausted by
//! the runner closure by the time its error reaches here, so it is
//! treated as `Abort`.
//!
//! A node whose predecessor failed under `Abort` is never dispatched at
//! all: it stays `Pending` (not `Failed` — its runner genuinely never
//! ran) and the abort cascades transitively, since a later successor
//! sees this node's own done-signal close with its state still
//! `Pending`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dag::{FailurePolicy, Graph, NodeInner, NodeState, RunMode};
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    ReportedFailures,
}

pub struct Scheduler {
    max_workers: usize,
}

impl Scheduler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Run every node in the graph to completion (or abort/cancellation).
    /// `resume` names nodes to treat as already-succeeded without
    /// executing their runner.
    pub async fn run(
        &self,
        graph: Arc<Graph>,
        resume: HashSet<String>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let layers = graph.topo_layers()?;
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let report_flag = Arc::new(AtomicBool::new(false));
        let mut first_error: Option<EngineError> = None;

        // Every layer is walked even after an abort: nodes downstream of
        // the failure still need their state set via the cancellation
        // check in `run_node` so callers can see which nodes never ran.
        for layer in layers.iter() {
            let mut join_set: JoinSet<(String, Result<(), EngineError>)> = JoinSet::new();

            for node_id in layer {
                if resume.contains(node_id) {
                    let node = graph.node(node_id)?;
                    node.mark_resumed();
                    continue;
                }

                let node = graph.node(node_id)?;
                let mode = node.mode;
                let sem = semaphore.clone();
                let graph_cl = graph.clone();
                let cancel_cl = cancel.clone();
                let report_cl = report_flag.clone();
                let id = node_id.clone();

                join_set.spawn(async move {
                    let permit = tokio::select! {
                        p = sem.acquire_owned() => p.ok(),
                        _ = cancel_cl.cancelled() => None,
                    };
                    if permit.is_none() {
                        return (id, Err(EngineError::Cancelled));
                    }
                    let result = run_node(&graph_cl, &node, &cancel_cl, &report_cl).await;
                    (id, result)
                });

                if mode == RunMode::Serial {
                    drain(&mut join_set, &mut first_error).await?;
                }
            }

            drain(&mut join_set, &mut first_error).await?;
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if report_flag.load(Ordering::SeqCst) {
            return Err(EngineError::Reported("dag executed with skipped failures".into()));
        }
        Ok(RunOutcome::Success)
    }
}

async fn drain(
    join_set: &mut JoinSet<(String, Result<(), EngineError>)>,
    first_error: &mut Option<EngineError>,
) -> Result<(), EngineError> {
    while let Some(joined) = join_set.join_next().await {
        let (_id, res) = joined.map_err(|e| EngineError::Internal(format!("task panicked: {e}")))?;
        if let Err(e) = res {
            if first_error.is_none() {
                *first_error = Some(e);
            }
        }
    }
    Ok(())
}

/// Wait for predecessors, check for abort-cascade, then run this node's
/// own runner and classify the result against its failure policy.
async fn run_node(
    graph: &Graph,
    node: &Arc<NodeInner>,
    cancel: &CancellationToken,
    report_flag: &AtomicBool,
) -> Result<(), EngineError> {
    let preds = node.predecessors();
    for pred_id in &preds {
        let pred = graph.node(pred_id)?;
        tokio::select! {
            _ = pred.done.wait() => {},
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        }
    }

    for pred_id in &preds {
        let pred = graph.node(pred_id)?;
        let pred_aborted = pred.state() == NodeState::Failed && pred.policy.on_failure == FailurePolicy::Abort;
        // `Pending` after `done` has closed means the predecessor was
        // itself short-circuited by this same check, never ran its
        // runner, and is cascading the abort one level further.
        let pred_cascaded = pred.state() == NodeState::Pending;
        if pred_aborted || pred_cascaded {
            node.done.close();
            return Err(EngineError::TaskFailed {
                node_id: node.id.clone(),
                message: format!("predecessor {pred_id} failed (abort)"),
                retry_count: 0,
            });
        }
    }

    if cancel.is_cancelled() {
        node.set_state(NodeState::Failed);
        node.done.close();
        return Err(EngineError::Cancelled);
    }

    node.set_state(NodeState::Running);

    let result = match &node.runner {
        None => Ok(()),
        Some(runner) => {
            tokio::select! {
                res = runner() => res,
                _ = cancel.cancelled() => Err(anyhow::anyhow!("cancelled")),
            }
        }
    };

    match result {
        Ok(()) => {
            node.set_state(NodeState::Succeeded);
            node.done.close();
            Ok(())
        }
        Err(e) => match node.policy.on_failure {
            FailurePolicy::Abort | FailurePolicy::Retry => {
                graph.trigger_abort();
                cancel.cancel();
                node.set_state(NodeState::Failed);
                node.done.close();
                let (message, retry_count) = match e.downcast_ref::<crate::error::RunnerFailure>() {
                    Some(f) => (f.message.clone(), f.retry_count),
                    None => (e.to_string(), 0),
                };
                Err(EngineError::TaskFailed {
                    node_id: node.id.clone(),
                    message,
                    retry_count,
                })
            }
            FailurePolicy::Skip => {
                node.set_state(NodeState::Failed);
                node.done.close();
                Ok(())
            }
            FailurePolicy::SkipButReport => {
                report_flag.store(true, Ordering::SeqCst);
                node.set_state(NodeState::Failed);
                node.done.close();
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{NodeDescriptor, NodePolicy};
    use std::sync::Mutex;
    use std::time::Duration;

    fn runner_ok(log: Arc<Mutex<Vec<String>>>, id: &'static str) -> crate::dag::Runner {
        Arc::new(move || {
            let log = log.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                log.lock().unwrap().push(id.to_string());
                Ok(())
            })
        })
    }

    fn runner_err(id: &'static str) -> crate::dag::Runner {
        Arc::new(move || Box::pin(async move { Err(anyhow::anyhow!("{id} boom")) }))
    }

    #[tokio::test]
    async fn diamond_runs_leaf_first_and_succeeds() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = Arc::new(
            Graph::build(vec![
                NodeDescriptor::new("a", RunMode::Parallel).with_runner(runner_ok(log.clone(), "a")),
                NodeDescriptor::new("b", RunMode::Parallel)
                    .with_deps(vec!["a".into()])
                    .with_runner(runner_ok(log.clone(), "b")),
                NodeDescriptor::new("c", RunMode::Parallel)
                    .with_deps(vec!["a".into()])
                    .with_runner(runner_ok(log.clone(), "c")),
                NodeDescriptor::new("d", RunMode::Parallel)
                    .with_deps(vec!["b".into(), "c".into()])
                    .with_runner(runner_ok(log.clone(), "d")),
            ])
            .unwrap(),
        );

        let outcome = Scheduler::new(4).run(graph, HashSet::new(), CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Success);
        let order = log.lock().unwrap().clone();
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
    }

    #[tokio::test]
    async fn abort_policy_stops_downstream_nodes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = Arc::new(
            Graph::build(vec![
                NodeDescriptor::new("a", RunMode::Parallel).with_runner(runner_err("a")),
                NodeDescriptor::new("b", RunMode::Parallel)
                    .with_deps(vec!["a".into()])
                    .with_runner(runner_ok(log.clone(), "b")),
            ])
            .unwrap(),
        );

        let err = Scheduler::new(4).run(graph.clone(), HashSet::new(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskFailed { .. }));
        assert!(log.lock().unwrap().is_empty());
        // b's runner never ran: it was aborted before dispatch, so it
        // stays PENDING rather than transitioning to FAILED.
        assert_eq!(graph.node("b").unwrap().state(), NodeState::Pending);
    }

    #[tokio::test]
    async fn skip_policy_lets_dependents_proceed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = Arc::new(
            Graph::build(vec![
                NodeDescriptor::new("a", RunMode::Parallel)
                    .with_runner(runner_err("a"))
                    .with_policy(NodePolicy {
                        on_failure: FailurePolicy::Skip,
                        ..Default::default()
                    }),
                NodeDescriptor::new("b", RunMode::Parallel)
                    .with_deps(vec!["a".into()])
                    .with_runner(runner_ok(log.clone(), "b")),
            ])
            .unwrap(),
        );

        let outcome = Scheduler::new(4).run(graph, HashSet::new(), CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(*log.lock().unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn skip_but_report_surfaces_terminal_reported_error() {
        let graph = Arc::new(
            Graph::build(vec![NodeDescriptor::new("a", RunMode::Parallel)
                .with_runner(runner_err("a"))
                .with_policy(NodePolicy {
                    on_failure: FailurePolicy::SkipButReport,
                    ..Default::default()
                })])
            .unwrap(),
        );

        let err = Scheduler::new(4).run(graph, HashSet::new(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Reported(_)));
    }

    #[tokio::test]
    async fn serial_mode_runs_peers_one_at_a_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = Arc::new(
            Graph::build(vec![
                NodeDescriptor::new("a", RunMode::Serial).with_runner(runner_ok(log.clone(), "a")),
                NodeDescriptor::new("b", RunMode::Serial).with_runner(runner_ok(log.clone(), "b")),
            ])
            .unwrap(),
        );

        let outcome = Scheduler::new(4).run(graph, HashSet::new(), CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn resume_set_skips_execution_but_unblocks_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = Arc::new(
            Graph::build(vec![
                NodeDescriptor::new("a", RunMode::Parallel).with_runner(runner_err("a")),
                NodeDescriptor::new("b", RunMode::Parallel)
                    .with_deps(vec!["a".into()])
                    .with_runner(runner_ok(log.clone(), "b")),
            ])
            .unwrap(),
        );

        let mut resume = HashSet::new();
        resume.insert("a".to_string());

        let outcome = Scheduler::new(4).run(graph, resume, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(*log.lock().unwrap(), vec!["b".to_string()]);
    }
}
