//! Message types — the unit of agent-to-agent communication.
//!
//! A [`Message`] is built once by its author with the builder methods below
//! and then handed to the bus. The bus shares it with recipients as an
//! `Arc<Message>`, so nobody downstream can change what was sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default priority for messages that do not set one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Metadata key used to route broadcasts to topic subscribers.
pub const CHANNEL_KEY: &str = "channel";

/// Metadata key marking traffic a coordination pattern recorded itself.
pub const PATTERN_KEY: &str = "pattern";

/// What a message asks of its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Delegate,
    Veto,
    Approve,
    Escalate,
    Inform,
    /// Status and bookkeeping events. Never triggers reasoning.
    System,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Delegate => "delegate",
            Self::Veto => "veto",
            Self::Approve => "approve",
            Self::Escalate => "escalate",
            Self::Inform => "inform",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// A single message exchanged inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Session this message belongs to
    pub session_id: String,

    /// Sending agent ID (or "user" / "system")
    pub from_agent: String,

    /// Recipient agent ID. `None` means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<String>,

    pub kind: MessageKind,

    pub content: String,

    /// Causal link to the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Higher is more urgent
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub requires_response: bool,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Message {
    /// Create a message addressed to a single agent.
    pub fn new(
        session_id: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            from_agent: from_agent.into(),
            to_agent: Some(to_agent.into()),
            kind,
            content: content.into(),
            parent_id: None,
            priority: DEFAULT_PRIORITY,
            requires_response: false,
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a broadcast message (no explicit recipient).
    pub fn broadcast(
        session_id: impl Into<String>,
        from_agent: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            to_agent: None,
            ..Self::new(session_id, from_agent, String::new(), kind, content)
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Tag a broadcast with a topic so channel subscribers receive it too.
    pub fn on_channel(self, channel: impl Into<String>) -> Self {
        self.with_metadata(CHANNEL_KEY, channel.into())
    }

    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_agent.as_deref().is_none_or(str::is_empty)
    }

    /// The topic tag of a broadcast, if any.
    pub fn channel(&self) -> Option<&str> {
        self.metadata.get(CHANNEL_KEY).and_then(|v| v.as_str())
    }

    /// Mark a message as recorded by the named pattern. Pattern traffic is
    /// answered in place and never replayed into a mailbox.
    pub fn from_pattern(self, pattern: impl Into<String>) -> Self {
        self.with_metadata(PATTERN_KEY, pattern.into())
    }

    pub fn is_pattern_traffic(&self) -> bool {
        self.metadata.contains_key(PATTERN_KEY)
    }
}
