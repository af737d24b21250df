//! Orchestration engine for Conclave.
//!
//! The engine is the only component that creates sessions. It spawns one
//! [`AgentRuntime`](conclave_agent::AgentRuntime) per requested role, runs
//! exactly one coordination pattern per session, and settles the session
//! as completed, failed (pattern error or blocking veto) or cancelled.

pub mod engine;
pub mod patterns;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use engine::{OrchestrationEngine, SessionReport};
pub use patterns::{AgentOutput, AutoApprove, GateDecision, HumanGate, PatternResult, PatternRun, dispatch};
