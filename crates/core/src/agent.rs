//! Agent roles, permissions, and runtime state.
//!
//! An [`AgentRole`] is a read-only definition supplied from outside (the role
//! catalog). An [`AgentInstance`] is the mutable record of one spawned agent,
//! owned by its runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles ranked below this are organizers unless they say otherwise.
pub const ORGANIZER_RANK_CEILING: u32 = 30;

/// How much authority a veto carries over its whole lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoLevel {
    /// Can never be overridden
    Absolute,
    /// Can only be lifted by a human, outside the system
    Strong,
    /// Can be overridden by any role with approval permission
    #[default]
    Advisory,
}

impl std::fmt::Display for VetoLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Absolute => "ABSOLUTE",
            Self::Strong => "STRONG",
            Self::Advisory => "ADVISORY",
        };
        f.write_str(s)
    }
}

/// Coarse classification controlling how much context a role receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityGrade {
    /// Plans and coordinates; gets full project context
    Organizer,
    /// Executes scoped tasks; gets task-scoped context
    #[default]
    Executor,
}

impl CapabilityGrade {
    pub fn from_rank(hierarchy_rank: u32) -> Self {
        if hierarchy_rank < ORGANIZER_RANK_CEILING {
            Self::Organizer
        } else {
            Self::Executor
        }
    }
}

/// Model preference for a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleModel {
    /// Primary model. `None` uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Tried when the primary model fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for RoleModel {
    fn default() -> Self {
        Self {
            model: None,
            fallback_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// What a role is allowed to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermissions {
    #[serde(default)]
    pub can_veto: bool,

    #[serde(default)]
    pub can_approve: bool,

    #[serde(default)]
    pub can_delegate: bool,

    #[serde(default)]
    pub veto_level: VetoLevel,

    /// Role that receives this role's escalations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_target: Option<String>,

    /// Read-only roles cannot run file or version-control writes
    #[serde(default)]
    pub read_only: bool,

    /// Whether build/test/scan tools may be run
    #[serde(default = "default_true")]
    pub can_execute: bool,

    /// Extra glob patterns this role may never touch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_paths: Vec<String>,

    /// Extra roots outside the workspace this role may touch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_paths: Vec<String>,

    /// Hard cap on completion tokens, below the model's own setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_call: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for RolePermissions {
    fn default() -> Self {
        Self {
            can_veto: false,
            can_approve: false,
            can_delegate: false,
            veto_level: VetoLevel::default(),
            escalation_target: None,
            read_only: false,
            can_execute: true,
            denied_paths: Vec::new(),
            allowed_paths: Vec::new(),
            max_tokens_per_call: None,
        }
    }
}

/// A role definition (persona + permissions + model preference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRole {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// System prompt text for this role
    pub persona: String,

    /// Lower ranks sit higher in the hierarchy
    #[serde(default = "default_rank")]
    pub hierarchy_rank: u32,

    /// Explicit grade; derived from the rank when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<CapabilityGrade>,

    #[serde(default)]
    pub model: RoleModel,

    #[serde(default)]
    pub permissions: RolePermissions,

    /// Tool allow-list. `None` means unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,

    /// Skill snippets offered as context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
}

fn default_rank() -> u32 {
    50
}

impl AgentRole {
    pub fn new(id: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            persona: persona.into(),
            hierarchy_rank: default_rank(),
            grade: None,
            model: RoleModel::default(),
            permissions: RolePermissions::default(),
            allowed_tools: None,
            skills: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    pub fn capability_grade(&self) -> CapabilityGrade {
        self.grade
            .unwrap_or_else(|| CapabilityGrade::from_rank(self.hierarchy_rank))
    }

    pub fn max_tokens(&self) -> u32 {
        match self.permissions.max_tokens_per_call {
            Some(cap) => self.model.max_tokens.min(cap),
            None => self.model.max_tokens,
        }
    }

    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|tools| tools.iter().any(|t| t == tool_name))
    }
}

/// Runtime status of a spawned agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Acting,
    Paused,
    Error,
    /// Terminal
    Stopped,
}

impl AgentStatus {
    /// The edges of the runtime state machine.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Idle, Thinking) | (Thinking, Acting) | (Thinking, Idle) | (Acting, Idle) => true,
            (Idle | Thinking | Acting, Error) => true,
            (Error, Idle) => true,
            (Idle | Error, Paused) => true,
            (Paused, Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Acting => "acting",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// The mutable record of one spawned agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub role_id: String,
    pub session_id: String,
    pub status: AgentStatus,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub tokens_used: u64,
    pub error_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(role_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let role_id = role_id.into();
        let suffix = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        Self {
            id: format!("{role_id}-{}", &suffix[..8]),
            role_id,
            session_id: session_id.into(),
            status: AgentStatus::Idle,
            messages_sent: 0,
            messages_received: 0,
            tokens_used: 0,
            error_count: 0,
            created_at: now,
            last_active: now,
        }
    }
}
