//! Shared test helpers for runtime tests.

use async_trait::async_trait;
use conclave_core::error::{ModelError, ToolError};
use conclave_core::provider::{LanguageModel, LlmRequest};
use conclave_core::tool::{ToolExecutor, ToolOutput};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A model that returns scripted answers in order.
///
/// Once the script runs out it repeats `fallback` when one is set, otherwise
/// every call fails.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same text.
    pub fn repeating(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new(Vec::new())
        }
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn query(&self, request: &LlmRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(ModelError::Api {
                status_code: 500,
                message: "script exhausted".into(),
            }),
        }
    }
}

/// A tool executor that echoes its calls.
#[derive(Default)]
pub struct EchoTools {
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl EchoTools {
    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for EchoTools {
    async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if name == "missing" {
            return Err(ToolError::NotFound(name.to_string()));
        }
        Ok(ToolOutput::ok(format!("{name} ran with {arguments}")))
    }

    fn tool_names(&self) -> Vec<String> {
        vec!["code_read".into(), "code_write".into(), "git_status".into()]
    }
}
