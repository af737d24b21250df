//! Project memory — persisted knowledge offered to agents as context.
//!
//! The runtime reads a handful of recent entries (and, for organizers, the
//! project vision) when it assembles a prompt. Writes come from outside the
//! orchestration core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;

/// A single remembered fact about a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,

    /// Free-form grouping (e.g., "decision", "convention")
    #[serde(default)]
    pub category: String,

    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            category: String::new(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProjectMemory: Send + Sync {
    /// Store a fact about a project.
    async fn remember(&self, project_id: &str, entry: MemoryEntry) -> Result<(), StoreError>;

    /// Most recent entries first.
    async fn recall(&self, project_id: &str, limit: usize) -> Result<Vec<MemoryEntry>, StoreError>;

    /// The project's vision statement, if one was recorded.
    async fn vision(&self, project_id: &str) -> Result<Option<String>, StoreError>;
}

/// A memory that knows nothing. Used when no project is attached.
pub struct NoProjectMemory;

#[async_trait]
impl ProjectMemory for NoProjectMemory {
    async fn remember(&self, _project_id: &str, _entry: MemoryEntry) -> Result<(), StoreError> {
        Ok(())
    }

    async fn recall(&self, _project_id: &str, _limit: usize) -> Result<Vec<MemoryEntry>, StoreError> {
        Ok(Vec::new())
    }

    async fn vision(&self, _project_id: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}
