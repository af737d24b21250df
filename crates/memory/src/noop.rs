//! No-op store — disables message persistence entirely.

use async_trait::async_trait;
use conclave_core::error::StoreError;
use conclave_core::message::Message;
use conclave_core::store::MessageStore;

/// A message store that keeps nothing.
pub struct NoopStore;

#[async_trait]
impl MessageStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn insert(&self, _message: &Message) -> Result<(), StoreError> {
        Ok(())
    }

    async fn messages_for_session(
        &self,
        _session_id: &str,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(Vec::new())
    }
}
