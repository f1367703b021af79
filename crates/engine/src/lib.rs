//! `engine` crate — DAG model, scheduler, task executor, and orchestrator
//! that together run a workflow template to completion.

pub mod dag;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod models;
pub mod orchestrator;
pub mod scheduler;

pub use dag::{FailurePolicy, Graph, NodeDescriptor, NodePolicy, NodeState, RunMode};
pub use error::EngineError;
pub use executor::{BackoffPolicy, TaskExecutionResult, TaskExecutor, TaskStatus};
pub use hooks::{Hook, TracingHook};
pub use models::{Edge, NodeDefinition, Trigger, Workflow};
pub use orchestrator::{bind, Definition, ExecutionResult, Orchestrator, PersistenceCallback, StepTransition};
pub use scheduler::{RunOutcome, Scheduler};

#[cfg(test)]
mod scenarios_tests;
