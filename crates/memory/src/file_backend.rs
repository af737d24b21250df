//! JSONL message log — append-only persistent message storage.
//!
//! Each line is a JSON-encoded [`Message`]. Inserts append a single line;
//! session queries scan the file. Sessions are kept in memory alongside.
//!
//! Default location: `~/.conclave/messages.jsonl`

use async_trait::async_trait;
use conclave_core::error::StoreError;
use conclave_core::message::Message;
use conclave_core::session::Session;
use conclave_core::store::{MessageStore, SessionStore};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub struct JsonlMessageLog {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl JsonlMessageLog {
    /// Create a log at the given path. The file is created on first insert.
    pub fn new(path: PathBuf) -> Self {
        debug!(path = %path.display(), "JSONL message log opened");
        Self {
            path,
            write_lock: Mutex::new(()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl MessageStore for JsonlMessageLog {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn insert(&self, message: &Message) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("cannot create log directory: {e}")))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot open message log: {e}")))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot append to message log: {e}")))?;

        Ok(())
    }

    async fn messages_for_session(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted message log line");
                    None
                }
            })
            .filter(|m| m.session_id == session_id)
            .skip(offset)
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl SessionStore for JsonlMessageLog {
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
