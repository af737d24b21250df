//! OpenAI-compatible chat completions backend.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/chat/completions`. Only the non-streaming text subset is used.

use async_trait::async_trait;
use conclave_core::error::ModelError;
use conclave_core::provider::{LanguageModel, LlmRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub struct OpenAiCompatModel {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenRouter backend (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key, timeout)
    }

    pub fn openai(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, timeout)
    }

    /// Create an Ollama backend. Ollama ignores the key.
    pub fn ollama(base_url: &str, timeout: Duration) -> Result<Self, ModelError> {
        Self::new("ollama", base_url, "ollama", timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(request: &LlmRequest) -> ApiRequest<'_> {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(ApiMessage {
                role: "system",
                content: &request.system_prompt,
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: &request.prompt,
        });

        ApiRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }

    fn parse_response(&self, body: ApiResponse) -> Result<String, ModelError> {
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse(self.name.clone()));
        }
        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, request: &LlmRequest) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(request);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(format!("{} did not answer: {e}", self.name))
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ModelError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ModelError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ModelError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| ModelError::Api {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        self.parse_response(api_response)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> OpenAiCompatModel {
        OpenAiCompatModel::openai("sk-test", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn openrouter_constructor() {
        let m = OpenAiCompatModel::openrouter("key", Duration::from_secs(5)).unwrap();
        assert_eq!(m.name(), "openrouter");
        assert_eq!(m.base_url(), "https://openrouter.ai/api/v1");
    }

    #[test]
    fn ollama_constructor_trims_slash() {
        let m = OpenAiCompatModel::ollama("http://localhost:11434/v1/", Duration::from_secs(5)).unwrap();
        assert_eq!(m.name(), "ollama");
        assert_eq!(m.base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn body_carries_system_and_user_messages() {
        let request = LlmRequest::new("gpt-4o-mini", "Plan the release").with_system("You are the PM.");
        let body = serde_json::to_value(OpenAiCompatModel::request_body(&request)).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You are the PM.");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Plan the release");
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let request = LlmRequest::new("m", "hi");
        let body = serde_json::to_value(OpenAiCompatModel::request_body(&request)).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parses_first_choice() {
        let body: ApiResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Done." } }]
        }))
        .unwrap();
        assert_eq!(model().parse_response(body).unwrap(), "Done.");
    }

    #[test]
    fn blank_content_is_empty_response() {
        let body: ApiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }]
        }))
        .unwrap();
        assert!(matches!(model().parse_response(body), Err(ModelError::EmptyResponse(_))));

        let body: ApiResponse = serde_json::from_value(serde_json::json!({ "choices": [] })).unwrap();
        assert!(matches!(model().parse_response(body), Err(ModelError::EmptyResponse(_))));
    }
}
