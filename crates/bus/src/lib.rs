//! Message bus for Conclave agents.
//!
//! Routes messages to bounded per-agent mailboxes (or in-process handlers),
//! persists them through a [`MessageStore`](conclave_core::MessageStore),
//! keeps undeliverable messages in a dead-letter ring, and fans every
//! message out to best-effort observers.

pub mod bus;
pub mod dead_letter;

pub use bus::{BusError, BusStats, Mailbox, MessageBus, MessageHandler, PublishOutcome};
pub use dead_letter::{DeadLetter, DeadLetterReason, DeadLetterRing};
