//! Persistence capability.
//!
//! Append-only message log plus session records. Failures here must never
//! block routing; callers decide whether a failure is fatal.

use async_trait::async_trait;
use crate::error::StoreError;
use crate::message::Message;
use crate::session::Session;

#[async_trait]
pub trait MessageStore: Send + Sync {
    fn name(&self) -> &str;

    /// Append a message.
    async fn insert(&self, message: &Message) -> Result<(), StoreError>;

    /// Messages of one session in insertion order.
    async fn messages_for_session(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session record.
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn load_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;
}
