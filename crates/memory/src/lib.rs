//! Persistence capability implementations for Conclave.
//!
//! - [`InMemoryStore`] — messages, sessions and project memory in process memory
//! - [`JsonlMessageLog`] — append-only JSONL message log on disk
//! - [`NoopStore`] — discards everything

pub mod file_backend;
pub mod in_memory;
pub mod noop;

pub use file_backend::JsonlMessageLog;
pub use in_memory::InMemoryStore;
pub use noop::NoopStore;
