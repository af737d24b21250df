//! Permission guard for Conclave agents.
//!
//! Provides:
//! - **Tool policy**: tool classes and the always-denied path rules
//! - **Rate limits**: per (agent, session) tool-call and write budgets
//! - **Path sandbox**: symlink-aware workspace containment
//! - **Audit logging**: append-only denial records with pluggable sinks
//! - **Guard**: the layered check every tool call passes through

pub mod audit;
pub mod guard;
pub mod path;
pub mod policy;
pub mod rate_limit;

pub use audit::{AuditLogger, AuditSink, DenialStats, PermissionDenial, TracingSink};
pub use guard::{Denial, PermissionGuard, ToolRequest};
pub use path::{is_within, normalize, resolve_path};
pub use policy::ToolClass;
pub use rate_limit::{RateLimitExceeded, RateLimiter, Usage};
