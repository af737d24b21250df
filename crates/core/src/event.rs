//! Observer events — the best-effort side channel for presentation layers.
//!
//! Every published message and every agent or session status change is
//! offered to observers. Observers never feed back into agent traffic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use crate::agent::AgentStatus;
use crate::message::Message;
use crate::session::SessionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// A message went through the bus
    Message { message: Arc<Message> },

    /// An agent changed status
    StatusChanged {
        agent_id: String,
        session_id: String,
        from: AgentStatus,
        to: AgentStatus,
        timestamp: DateTime<Utc>,
    },

    /// A session changed status
    SessionChanged {
        session_id: String,
        status: SessionStatus,
        timestamp: DateTime<Utc>,
    },
}

impl ObserverEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Message { message } => &message.session_id,
            Self::StatusChanged { session_id, .. } | Self::SessionChanged { session_id, .. } => {
                session_id
            }
        }
    }
}
