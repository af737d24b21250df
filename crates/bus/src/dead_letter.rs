//! Dead-letter ring for undeliverable messages.

use chrono::{DateTime, Utc};
use conclave_core::message::Message;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    UnknownRecipient,
    QueueFull,
    MailboxClosed,
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownRecipient => "unknown recipient",
            Self::QueueFull => "queue full",
            Self::MailboxClosed => "mailbox closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub message: Arc<Message>,
    pub recipient: String,
    pub reason: DeadLetterReason,
    pub timestamp: DateTime<Utc>,
}

/// Bounded ring of dead letters. The oldest entry is evicted first.
#[derive(Debug)]
pub struct DeadLetterRing {
    entries: VecDeque<DeadLetter>,
    capacity: usize,
}

impl DeadLetterRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append a dead letter, evicting the oldest when full.
    pub fn push(&mut self, letter: DeadLetter) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(letter);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::message::MessageKind;

    fn letter(content: &str) -> DeadLetter {
        DeadLetter {
            message: Arc::new(Message::new("s", "a", "b", MessageKind::Inform, content)),
            recipient: "b".into(),
            reason: DeadLetterReason::QueueFull,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut ring = DeadLetterRing::new(2);
        ring.push(letter("one"));
        ring.push(letter("two"));
        ring.push(letter("three"));

        let contents: Vec<String> = ring
            .snapshot()
            .iter()
            .map(|l| l.message.content.clone())
            .collect();
        assert_eq!(contents, vec!["two", "three"]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn reason_display() {
        assert_eq!(DeadLetterReason::UnknownRecipient.to_string(), "unknown recipient");
        assert_eq!(DeadLetterReason::QueueFull.to_string(), "queue full");
    }
}
