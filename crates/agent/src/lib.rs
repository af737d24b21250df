//! Agent runtime for Conclave.
//!
//! Each spawned agent runs one task that:
//!
//! 1. **Waits** on its bus mailbox (or a stop / pause signal)
//! 2. **Filters** noise: system events, echoes, and runaway partners
//! 3. **Thinks**: assembles grade-scoped context and queries the model chain
//! 4. **Uses tools** the permission guard allows, feeding results back once
//! 5. **Acts**: turns action tags into bus messages, or answers the sender
//!
//! Pattern implementations drive agents directly through
//! [`AgentRuntime::respond`].

pub mod actions;
pub mod context;
pub mod roster;
pub mod runtime;
pub mod think;
pub mod tooling;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use actions::{ActionKind, ParsedAction, ToolCall, parse_actions, parse_tool_calls};
pub use context::{ContextLimits, PromptContext};
pub use roster::{Roster, RosterEntry};
pub use runtime::{AgentRuntime, RuntimeError, RuntimeServices, Turn};
pub use think::{ModelChain, Reply};
pub use tooling::{GuardedTools, Observation};
