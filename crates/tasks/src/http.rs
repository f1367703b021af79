//! `HttpTask` — invokes one HTTP request.
//!
//! Grounded on the same shape as `MockTask`; the only difference is what
//! `execute` actually does. Kept intentionally small: the platform's
//! concern is the `Task` contract, not a full HTTP client feature set.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;

use crate::{Task, TaskContext, TaskError, TaskOutput};

/// Configuration for one HTTP call.
#[derive(Debug, Clone)]
pub struct HttpTask {
    id: String,
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Value>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTask {
    pub fn new(id: impl Into<String>, method: &str, url: impl Into<String>) -> Result<Self, TaskError> {
        let method = method
            .parse::<Method>()
            .map_err(|_| TaskError::Validation(format!("unrecognized HTTP method '{method}'")))?;
        Ok(Self {
            id: id.into(),
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Task for HttpTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        "http"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate(&self) -> Result<(), TaskError> {
        reqwest::Url::parse(&self.url)
            .map_err(|e| TaskError::Validation(format!("invalid url '{}': {e}", self.url)))?;
        Ok(())
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
        let started_at = Utc::now();

        let mut req = self.client.request(self.method.clone(), &self.url);
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }
        if let Some(body) = &self.body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TaskError::failed(format!("request failed: {e}")))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .unwrap_or_else(|_| Value::String(String::new()));

        if !status.is_success() {
            return Err(TaskError::failed(format!(
                "http task '{}' received status {status}",
                self.id
            )));
        }

        Ok(TaskOutput::success(self.id.clone(), body, started_at))
    }
}
