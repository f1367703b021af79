//! `TaskRegistry` — the thin adapter unifying the low-level `node_type`
//! string vocabulary with the richer [`crate::Task`] contract.
//!
//! The source system carried a process-local, implicitly-global registry
//! of step-runner kinds keyed by string. This rewrite keeps the string
//! keying (workflow templates are still persisted as JSON with a
//! `node_type` field) but makes the registry an explicit object passed by
//! reference, never global mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::Task;

/// Builds a `Task` from a node's `config` JSON blob.
pub type TaskFactory = Arc<dyn Fn(&str, &Value) -> Result<Arc<dyn Task>> + Send + Sync>;

/// A registry of `node_type -> TaskFactory` mappings.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `node_type`. Replaces any prior factory
    /// registered under the same key.
    pub fn register(&mut self, node_type: impl Into<String>, factory: TaskFactory) -> &mut Self {
        self.factories.insert(node_type.into(), factory);
        self
    }

    /// Resolve `node_type` + `config` into a concrete `Task`.
    pub fn build(&self, id: &str, node_type: &str, config: &Value) -> Result<Arc<dyn Task>> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| anyhow::anyhow!("no task implementation registered for type '{node_type}'"))?;
        factory(id, config)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTask;
    use serde_json::json;

    #[test]
    fn unregistered_type_is_an_error() {
        let registry = TaskRegistry::new();
        assert!(registry.build("n1", "mock", &Value::Null).is_err());
    }

    #[test]
    fn registered_factory_builds_a_task() {
        let mut registry = TaskRegistry::new();
        registry.register(
            "mock",
            Arc::new(|id, _config| Ok(Arc::new(MockTask::returning(id, json!({}))) as Arc<dyn Task>)),
        );

        let task = registry.build("n1", "mock", &Value::Null).expect("should build");
        assert_eq!(task.id(), "n1");
        assert!(registry.contains("mock"));
    }
}
