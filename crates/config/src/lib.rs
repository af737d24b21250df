//! Configuration loading, validation, and management for Conclave.
//!
//! Loads configuration from `~/.conclave/config.toml` with environment
//! variable overrides. Validates all settings at startup. Role definitions
//! live in a separate catalog file, see [`roles`].

pub mod roles;

pub use roles::RoleCatalog;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.conclave/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language model settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Message bus capacities and persistence policy
    #[serde(default)]
    pub bus: BusConfig,

    /// Permission guard limits and workspace sandbox
    #[serde(default)]
    pub guard: GuardConfig,

    /// Veto manager settings
    #[serde(default)]
    pub veto: VetoConfig,

    /// Agent runtime loop settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Orchestration pattern settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Path to the role catalog (TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles_file: Option<PathBuf>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("llm", &self.llm)
            .field("bus", &self.bus)
            .field("guard", &self.guard)
            .field("veto", &self.veto)
            .field("runtime", &self.runtime)
            .field("orchestrator", &self.orchestrator)
            .field("roles_file", &self.roles_file)
            .finish()
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// ── LLM ──────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Used by roles that don't name a model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Used by roles that don't name a fallback model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_fallback_model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Lower-tier local model tried after the role's chain fails
    #[serde(default)]
    pub local: LocalLlmConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            default_model: default_model(),
            default_fallback_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            local: LocalLlmConfig::default(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("default_fallback_model", &self.default_fallback_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("local", &self.local)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_local_url")]
    pub base_url: String,

    #[serde(default = "default_local_model")]
    pub model: String,
}

fn default_local_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_local_model() -> String {
    "llama3.1".into()
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_local_url(),
            model: default_local_model(),
        }
    }
}

// ── Bus ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,

    /// Propagate store failures out of `publish`
    #[serde(default)]
    pub persistence_mandatory: bool,

    /// Append-only JSONL message log. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_log: Option<PathBuf>,
}

fn default_mailbox_capacity() -> usize {
    500
}
fn default_dead_letter_capacity() -> usize {
    1000
}
fn default_observer_capacity() -> usize {
    200
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            dead_letter_capacity: default_dead_letter_capacity(),
            observer_capacity: default_observer_capacity(),
            persistence_mandatory: false,
            message_log: None,
        }
    }
}

// ── Guard ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_session: u32,

    #[serde(default = "default_max_writes")]
    pub max_writes_per_session: u32,

    /// Project workspace root. Current directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    /// Extra roots every agent may touch
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,

    /// Denials kept in memory for inspection
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Mirror denials to the tracing log
    #[serde(default = "default_true")]
    pub audit_to_log: bool,
}

fn default_max_tool_calls() -> u32 {
    200
}
fn default_max_writes() -> u32 {
    80
}
fn default_audit_capacity() -> usize {
    1000
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_session: default_max_tool_calls(),
            max_writes_per_session: default_max_writes(),
            workspace: None,
            allowed_roots: Vec::new(),
            audit_capacity: default_audit_capacity(),
            audit_to_log: true,
        }
    }
}

// ── Veto ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoConfig {
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_cooldown() -> u64 {
    60
}

impl Default for VetoConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
        }
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Mailbox cycles per agent per session
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    #[serde(default = "default_think_timeout")]
    pub think_timeout_secs: u64,

    /// Delay before an errored agent returns to idle
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,

    /// Consecutive exchanges with one partner before messages are skipped
    #[serde(default = "default_ping_pong_limit")]
    pub ping_pong_limit: u32,

    #[serde(default = "default_max_tool_calls_per_cycle")]
    pub max_tool_calls_per_cycle: usize,
}

fn default_max_rounds() -> u32 {
    10
}
fn default_think_timeout() -> u64 {
    300
}
fn default_error_backoff() -> u64 {
    1000
}
fn default_ping_pong_limit() -> u32 {
    3
}
fn default_max_tool_calls_per_cycle() -> usize {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            think_timeout_secs: default_think_timeout(),
            error_backoff_ms: default_error_backoff(),
            ping_pong_limit: default_ping_pong_limit(),
            max_tool_calls_per_cycle: default_max_tool_calls_per_cycle(),
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_network_rounds")]
    pub network_rounds: u32,

    #[serde(default = "default_loop_iterations")]
    pub loop_max_iterations: u32,

    /// Upper bound on a whole pattern run
    #[serde(default = "default_pattern_timeout")]
    pub pattern_timeout_secs: u64,

    /// Checkpoints a human-in-loop session stops at
    #[serde(default = "default_checkpoints")]
    pub human_checkpoints: Vec<String>,
}

fn default_network_rounds() -> u32 {
    5
}
fn default_loop_iterations() -> u32 {
    10
}
fn default_pattern_timeout() -> u64 {
    600
}
fn default_checkpoints() -> Vec<String> {
    vec!["review".into()]
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            network_rounds: default_network_rounds(),
            loop_max_iterations: default_loop_iterations(),
            pattern_timeout_secs: default_pattern_timeout(),
            human_checkpoints: default_checkpoints(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.conclave/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CONCLAVE_API_KEY` (then `OPENAI_API_KEY`, `OPENROUTER_API_KEY`)
    /// - `CONCLAVE_BASE_URL`, `CONCLAVE_MODEL`, `CONCLAVE_WORKSPACE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("CONCLAVE_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(url) = lookup("CONCLAVE_BASE_URL") {
            self.llm.base_url = url;
        }

        if let Some(model) = lookup("CONCLAVE_MODEL") {
            self.llm.default_model = model;
        }

        if let Some(workspace) = lookup("CONCLAVE_WORKSPACE") {
            self.guard.workspace = Some(PathBuf::from(workspace));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".conclave")
    }

    /// The workspace root agents are sandboxed to.
    pub fn workspace_root(&self) -> PathBuf {
        self.guard
            .workspace
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.bus.mailbox_capacity == 0
            || self.bus.dead_letter_capacity == 0
            || self.bus.observer_capacity == 0
        {
            return Err(ConfigError::ValidationError(
                "bus capacities must be greater than 0".into(),
            ));
        }

        if self.guard.max_writes_per_session > self.guard.max_tool_calls_per_session {
            return Err(ConfigError::ValidationError(
                "guard.max_writes_per_session cannot exceed guard.max_tool_calls_per_session".into(),
            ));
        }

        if self.runtime.max_rounds == 0
            || self.orchestrator.network_rounds == 0
            || self.orchestrator.loop_max_iterations == 0
        {
            return Err(ConfigError::ValidationError(
                "round limits must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.mailbox_capacity, 500);
        assert_eq!(config.bus.dead_letter_capacity, 1000);
        assert_eq!(config.guard.max_tool_calls_per_session, 200);
        assert_eq!(config.guard.max_writes_per_session, 80);
        assert_eq!(config.veto.cooldown_secs, 60);
        assert_eq!(config.runtime.max_rounds, 10);
        assert_eq!(config.runtime.think_timeout_secs, 300);
        assert!(!config.bus.persistence_mandatory);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.default_model, config.llm.default_model);
        assert_eq!(parsed.orchestrator.human_checkpoints, vec!["review".to_string()]);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[guard]
max_writes_per_session = 5

[runtime]
ping_pong_limit = 2
"#,
        )
        .unwrap();
        assert_eq!(config.guard.max_writes_per_session, 5);
        assert_eq!(config.guard.max_tool_calls_per_session, 200);
        assert_eq!(config.runtime.ping_pong_limit, 2);
        assert_eq!(config.runtime.max_rounds, 10);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.llm.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn write_ceiling_above_total_rejected() {
        let mut config = AppConfig::default();
        config.guard.max_writes_per_session = 500;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_writes_per_session"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.llm.default_model, "gpt-4o-mini");
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bus\nbroken").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("CONCLAVE_MODEL", "gpt-4o"),
            ("CONCLAVE_WORKSPACE", "/srv/project"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.default_model, "gpt-4o");
        assert_eq!(config.workspace_root(), PathBuf::from("/srv/project"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("mailbox_capacity = 500"));
        assert!(toml_str.contains("cooldown_secs = 60"));
    }
}
