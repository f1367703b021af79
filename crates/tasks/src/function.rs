//! `FunctionTask` — wraps a user-supplied async closure.
//!
//! The programmatic counterpart to `MockTask`: embedders that construct
//! workflows directly in Rust (rather than via the JSON `NodeDefinition`
//! format resolved through the registry) reach for this.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::{Task, TaskContext, TaskError, TaskOutput};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The body of a `FunctionTask`: receives the node's input value and the
/// task context, returns the node's output value.
pub type FunctionBody =
    Arc<dyn Fn(Value, TaskContext) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionTask {
    id: String,
    timeout: Duration,
    body: FunctionBody,
}

impl FunctionTask {
    pub fn new<F, Fut>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(Value, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            timeout: Duration::from_secs(30),
            body: Arc::new(move |input, ctx| Box::pin(body(input, ctx))),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Task for FunctionTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        "function"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
        let started_at = Utc::now();
        let output = (self.body)(ctx.input.clone(), ctx.clone()).await?;
        Ok(TaskOutput::success(self.id.clone(), output, started_at))
    }
}
