//! Model fallback chain.
//!
//! A role's query is tried against, in order:
//! 1. the role's primary model (or the configured default)
//! 2. the role's fallback model (or the configured default fallback)
//! 3. the local tier, when one is configured
//!
//! The first non-empty answer wins. When every tier fails the last error is
//! returned and the caller treats the cycle as failed.

use conclave_config::LlmConfig;
use conclave_core::agent::AgentRole;
use conclave_core::error::ModelError;
use conclave_core::provider::{LanguageModel, LlmRequest};
use std::sync::Arc;
use tracing::{debug, warn};

/// The text a model produced and which model produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub model: String,
}

impl Reply {
    /// Completion tokens, estimated from length.
    pub fn estimated_tokens(&self) -> u64 {
        (self.text.len() / 4) as u64
    }
}

struct Tier {
    backend: Arc<dyn LanguageModel>,
    model: String,
}

pub struct ModelChain {
    remote: Arc<dyn LanguageModel>,
    default_model: String,
    default_fallback: Option<String>,
    local: Option<Tier>,
}

impl ModelChain {
    pub fn new(remote: Arc<dyn LanguageModel>, default_model: impl Into<String>) -> Self {
        Self {
            remote,
            default_model: default_model.into(),
            default_fallback: None,
            local: None,
        }
    }

    pub fn from_config(
        remote: Arc<dyn LanguageModel>,
        config: &LlmConfig,
        local: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        let chain = Self::new(remote, config.default_model.clone())
            .with_default_fallback(config.default_fallback_model.clone());
        match local {
            Some(backend) => chain.with_local(backend, config.local.model.clone()),
            None => chain,
        }
    }

    /// Fallback model for roles that name none.
    pub fn with_default_fallback(mut self, model: Option<String>) -> Self {
        self.default_fallback = model.filter(|m| !m.is_empty());
        self
    }

    pub fn with_local(mut self, backend: Arc<dyn LanguageModel>, model: impl Into<String>) -> Self {
        self.local = Some(Tier {
            backend,
            model: model.into(),
        });
        self
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    /// Model names tried for `role`, in order.
    pub fn plan(&self, role: &AgentRole) -> Vec<String> {
        self.tiers(role).into_iter().map(|t| t.model).collect()
    }

    fn tiers(&self, role: &AgentRole) -> Vec<Tier> {
        let primary = role
            .model
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let fallback = role
            .model
            .fallback_model
            .clone()
            .or_else(|| self.default_fallback.clone())
            .filter(|m| *m != primary);

        let mut tiers = vec![Tier {
            backend: Arc::clone(&self.remote),
            model: primary,
        }];
        if let Some(model) = fallback {
            tiers.push(Tier {
                backend: Arc::clone(&self.remote),
                model,
            });
        }
        if let Some(local) = &self.local {
            tiers.push(Tier {
                backend: Arc::clone(&local.backend),
                model: local.model.clone(),
            });
        }
        tiers
    }

    /// Ask the chain on behalf of `role`.
    pub async fn query(
        &self,
        role: &AgentRole,
        system_prompt: &str,
        prompt: &str,
    ) -> Result<Reply, ModelError> {
        let tiers = self.tiers(role);
        let total = tiers.len();
        let mut last_error = ModelError::NotConfigured("No models in chain".into());
        let base = LlmRequest {
            temperature: role.model.temperature,
            max_tokens: role.max_tokens(),
            ..LlmRequest::new(self.default_model.as_str(), prompt).with_system(system_prompt)
        };

        for (i, tier) in tiers.into_iter().enumerate() {
            let request = base.for_model(tier.model.as_str());

            debug!(
                role = %role.id,
                backend = %tier.backend.name(),
                model = %tier.model,
                attempt = i + 1,
                total,
                "Fallback: trying model"
            );

            match tier.backend.query(&request).await {
                Ok(text) if !text.trim().is_empty() => {
                    return Ok(Reply {
                        text,
                        model: tier.model,
                    });
                }
                Ok(_) => {
                    warn!(role = %role.id, model = %tier.model, "Fallback: empty answer, trying next");
                    last_error = ModelError::EmptyResponse(tier.model);
                }
                Err(e) => {
                    warn!(
                        role = %role.id,
                        model = %tier.model,
                        error = %e,
                        "Fallback: model failed, trying next"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
