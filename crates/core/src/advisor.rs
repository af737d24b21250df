//! Pattern advisory capability.
//!
//! An external policy (workflow evolution, adaptive pattern selection) may
//! propose a different pattern or agent subset before a session runs. The
//! engine is free to ignore the proposal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::session::{OrchestrationPattern, Session};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub pattern: OrchestrationPattern,
    pub agent_ids: Vec<String>,
}

#[async_trait]
pub trait PatternAdvisor: Send + Sync {
    async fn suggest(&self, session: &Session) -> Option<Suggestion>;
}
