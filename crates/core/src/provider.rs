//! Language model capability — the abstraction over LLM backends.
//!
//! The orchestration core never speaks a provider wire protocol. It asks a
//! [`LanguageModel`] for text and treats any error as a failed attempt. The
//! fallback chain (primary model, fallback model, local tier) is built by the
//! agent runtime on top of this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ModelError;

/// A single query to a language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The model to use (e.g., "gpt-4o-mini", "llama3.1")
    pub model: String,

    /// The user-facing prompt
    pub prompt: String,

    /// Persona and instructions
    #[serde(default)]
    pub system_prompt: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Same request against another model.
    pub fn for_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }
}

/// The LLM capability consumed by agent runtimes and patterns.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend name for logs (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send one prompt and return the generated text.
    async fn query(&self, request: &LlmRequest) -> std::result::Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn query(&self, request: &LlmRequest) -> Result<String, ModelError> {
            Ok(format!("{}: {}", request.model, request.prompt))
        }
    }

    #[tokio::test]
    async fn model_trait_is_object_safe() {
        let model: Box<dyn LanguageModel> = Box::new(EchoModel);
        let request = LlmRequest::new("m1", "hi").with_system("be brief");
        assert_eq!(model.query(&request).await.unwrap(), "m1: hi");
        assert_eq!(model.query(&request.for_model("m2")).await.unwrap(), "m2: hi");
    }
}
