//! `MockTask` — a test double for [`crate::Task`].
//!
//! Useful in unit and integration tests where a real task implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::{Task, TaskContext, TaskError, TaskOutput};

/// Behaviour injected into `MockTask` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail validation outright.
    FailValidation(String),
    /// Fail with a task error (subject to the node's retry policy).
    Fail(String),
}

/// A mock task that records every call it receives and behaves however the
/// test author configured it.
pub struct MockTask {
    id: String,
    behaviour: MockBehaviour,
    timeout: Duration,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockTask {
    /// Create a mock that always succeeds with the given value.
    pub fn returning(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            behaviour: MockBehaviour::ReturnValue(value),
            timeout: Duration::from_secs(30),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock whose `validate()` always fails.
    pub fn failing_validation(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            behaviour: MockBehaviour::FailValidation(msg.into()),
            timeout: Duration::from_secs(30),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails execution with the given message.
    pub fn failing(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            behaviour: MockBehaviour::Fail(msg.into()),
            timeout: Duration::from_secs(30),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that fails its first `failures` calls, then succeeds.
    pub fn flaky(id: impl Into<String>, failures: usize, value: Value) -> FlakyTask {
        FlakyTask {
            id: id.into(),
            failures_remaining: Arc::new(Mutex::new(failures)),
            value,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of times this task has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Task for MockTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        "mock"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate(&self) -> Result<(), TaskError> {
        match &self.behaviour {
            MockBehaviour::FailValidation(msg) => Err(TaskError::Validation(msg.clone())),
            _ => Ok(()),
        }
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
        self.calls.lock().unwrap().push(ctx.input.clone());
        let started_at = Utc::now();

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                let mut out = json!({ "task": self.id });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(TaskOutput::success(self.id.clone(), out, started_at))
            }
            MockBehaviour::FailValidation(msg) => Err(TaskError::Validation(msg.clone())),
            MockBehaviour::Fail(msg) => Err(TaskError::failed(msg.clone())),
        }
    }
}

/// A task that fails a fixed number of times before succeeding — used to
/// exercise the retry loop deterministically.
pub struct FlakyTask {
    id: String,
    failures_remaining: Arc<Mutex<usize>>,
    value: Value,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl FlakyTask {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Task for FlakyTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        "mock"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
        self.calls.lock().unwrap().push(ctx.input.clone());
        let started_at = Utc::now();

        let mut remaining = self.failures_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(TaskError::failed("transient failure"));
        }
        drop(remaining);

        Ok(TaskOutput::success(self.id.clone(), self.value.clone(), started_at))
    }
}
