//! # Conclave Core
//!
//! Domain types, capability traits, and error definitions shared by every
//! Conclave crate. Nothing here spawns tasks or touches the network; it only
//! describes the model that the bus, guard, veto manager, runtime and
//! orchestration engine implement against.
//!
//! ## Capabilities
//!
//! The orchestration core treats a handful of collaborators as opaque
//! capabilities, each defined as a trait here:
//! - [`LanguageModel`] — the LLM query
//! - [`ToolExecutor`] — tool execution, always behind the permission guard
//! - [`MessageStore`] / [`SessionStore`] — append-only persistence
//! - [`ProjectMemory`] — persisted project knowledge used for context
//! - [`PatternAdvisor`] — optional pattern suggestions

pub mod advisor;
pub mod agent;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod session;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use advisor::{PatternAdvisor, Suggestion};
pub use agent::{
    AgentInstance, AgentRole, AgentStatus, CapabilityGrade, RoleModel, RolePermissions, VetoLevel,
};
pub use error::{Error, ModelError, Result, SessionError, StoreError, ToolError};
pub use event::ObserverEvent;
pub use memory::{MemoryEntry, NoProjectMemory, ProjectMemory};
pub use message::{Message, MessageKind};
pub use provider::{LanguageModel, LlmRequest};
pub use session::{OrchestrationPattern, Session, SessionStatus};
pub use store::{MessageStore, SessionStore};
pub use tool::{ToolExecutor, ToolOutput, ToolSpec};
