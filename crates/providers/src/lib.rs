//! Language model backends for Conclave.
//!
//! Every backend implements [`conclave_core::LanguageModel`]. Remote and
//! local (Ollama, vLLM) endpoints both speak the OpenAI-compatible chat
//! completions protocol, so one implementation covers them.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatModel;

use conclave_config::LlmConfig;
use conclave_core::error::ModelError;
use conclave_core::provider::LanguageModel;
use std::sync::Arc;
use std::time::Duration;

/// The remote model described by the `[llm]` section.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, ModelError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ModelError::NotConfigured(
            "No API key: set llm.api_key or CONCLAVE_API_KEY / OPENAI_API_KEY".into(),
        )
    })?;
    let model = OpenAiCompatModel::new(
        provider_name(&config.base_url),
        &config.base_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    Ok(Arc::new(model))
}

/// The local tier described by `[llm.local]`, when enabled.
pub fn local_from_config(config: &LlmConfig) -> Result<Option<Arc<dyn LanguageModel>>, ModelError> {
    if !config.local.enabled {
        return Ok(None);
    }
    let model = OpenAiCompatModel::ollama(
        &config.local.base_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    Ok(Some(Arc::new(model)))
}

fn provider_name(base_url: &str) -> &'static str {
    if base_url.contains("openrouter.ai") {
        "openrouter"
    } else if base_url.contains("api.openai.com") {
        "openai"
    } else if base_url.contains("localhost") || base_url.contains("127.0.0.1") {
        "local"
    } else {
        "openai-compatible"
    }
}
