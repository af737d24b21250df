//! Sessions and orchestration patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the eight fixed coordination topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationPattern {
    Sequential,
    Parallel,
    Hierarchical,
    Network,
    Router,
    Aggregator,
    Loop,
    HumanInLoop,
}

impl OrchestrationPattern {
    pub const ALL: [OrchestrationPattern; 8] = [
        Self::Sequential,
        Self::Parallel,
        Self::Hierarchical,
        Self::Network,
        Self::Router,
        Self::Aggregator,
        Self::Loop,
        Self::HumanInLoop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Hierarchical => "hierarchical",
            Self::Network => "network",
            Self::Router => "router",
            Self::Aggregator => "aggregator",
            Self::Loop => "loop",
            Self::HumanInLoop => "human_in_loop",
        }
    }

    /// Minimum number of live agents the pattern needs.
    pub fn min_agents(&self) -> usize {
        match self {
            Self::Router | Self::Aggregator | Self::Hierarchical => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for OrchestrationPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrchestrationPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("unknown orchestration pattern: {s}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One orchestrated unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub pattern: OrchestrationPattern,

    /// Spawned agent IDs, in the order the roles were requested
    #[serde(default)]
    pub agents: Vec<String>,

    /// Requested role IDs (including any that failed to spawn)
    #[serde(default)]
    pub role_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    pub status: SessionStatus,

    /// Veto reason or pattern error for a failed session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        goal: impl Into<String>,
        pattern: OrchestrationPattern,
        role_ids: Vec<String>,
        project_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            goal: goal.into(),
            pattern,
            agents: Vec::new(),
            role_ids,
            project_id,
            status: SessionStatus::Active,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
