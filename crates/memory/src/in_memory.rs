//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use conclave_core::error::StoreError;
use conclave_core::memory::{MemoryEntry, ProjectMemory};
use conclave_core::message::Message;
use conclave_core::session::Session;
use conclave_core::store::{MessageStore, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps messages, sessions and project memory in process memory.
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    messages: Arc<RwLock<Vec<Message>>>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    memories: Arc<RwLock<HashMap<String, Vec<MemoryEntry>>>>,
    visions: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_vision(&self, project_id: &str, vision: impl Into<String>) {
        self.visions
            .write()
            .await
            .insert(project_id.to_string(), vision.into());
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, message: &Message) -> Result<(), StoreError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn messages_for_session(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

#[async_trait]
impl ProjectMemory for InMemoryStore {
    async fn remember(&self, project_id: &str, entry: MemoryEntry) -> Result<(), StoreError> {
        self.memories
            .write()
            .await
            .entry(project_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn recall(&self, project_id: &str, limit: usize) -> Result<Vec<MemoryEntry>, StoreError> {
        let memories = self.memories.read().await;
        Ok(memories
            .get(project_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn vision(&self, project_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.visions.read().await.get(project_id).cloned())
    }
}
