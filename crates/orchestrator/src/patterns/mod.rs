//! Coordination patterns — who talks to whom, in what order.
//!
//! | Pattern        | Shape                                                  |
//! |----------------|--------------------------------------------------------|
//! | Sequential     | pipeline, each agent sees the previous output          |
//! | Parallel       | every agent answers the goal concurrently              |
//! | Hierarchical   | agent 0 decomposes, the rest work, agent 0 integrates  |
//! | Network        | all-to-all rounds until consensus or the round limit   |
//! | Router         | agent 0 picks one specialist among the rest            |
//! | Aggregator     | all but the last propose, the last synthesizes         |
//! | Loop           | agents iterate until `[COMPLETE]` or no change         |
//! | Human-in-loop  | agent 0 drafts, a human gate approves each checkpoint  |
//!
//! Patterns drive agents through [`AgentRuntime::respond`] and record every
//! prompt and answer on the bus so observers and later context see them.

pub mod delegation;
pub mod fanout;
pub mod human;
pub mod network;
pub mod pipeline;

use conclave_agent::AgentRuntime;
use conclave_bus::MessageBus;
use conclave_config::OrchestratorConfig;
use conclave_core::message::{Message, MessageKind};
use conclave_core::session::{OrchestrationPattern, Session};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

pub use human::{AutoApprove, GateDecision, HumanGate};

/// Sender id patterns use for their own prompts.
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Sender id for human feedback.
pub const HUMAN_ID: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentOutput {
    pub agent_id: String,
    pub role_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternResult {
    pub pattern: OrchestrationPattern,
    pub success: bool,
    pub outputs: Vec<AgentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PatternResult {
    pub fn ok(pattern: OrchestrationPattern, outputs: Vec<AgentOutput>) -> Self {
        Self {
            pattern,
            success: true,
            outputs,
            error: None,
        }
    }

    pub fn failed(
        pattern: OrchestrationPattern,
        outputs: Vec<AgentOutput>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            pattern,
            success: false,
            outputs,
            error: Some(error.into()),
        }
    }

    /// The last thing any agent produced.
    pub fn final_output(&self) -> Option<&str> {
        self.outputs.last().map(|o| o.content.as_str())
    }
}

/// Everything a pattern run may touch.
pub struct PatternRun<'a> {
    pub session: &'a Session,
    pub agents: &'a [Arc<AgentRuntime>],
    pub bus: &'a MessageBus,
    pub config: &'a OrchestratorConfig,
    pub gate: Option<&'a dyn HumanGate>,
}

impl PatternRun<'_> {
    pub fn goal(&self) -> &str {
        &self.session.goal
    }

    /// Send `content` to `agent` as one turn and record both sides.
    /// `None` when the agent failed or answered nothing.
    pub async fn ask(
        &self,
        agent: &AgentRuntime,
        from: &str,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Option<AgentOutput> {
        let prompt = Message::new(&self.session.id, from, agent.id(), kind, content)
            .requiring_response()
            .from_pattern(self.session.pattern.as_str());
        let prompt_id = prompt.id.clone();
        self.record(prompt.clone()).await;

        let turn = match agent.respond(&prompt).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(
                    session = %self.session.id,
                    agent = %agent.id(),
                    pattern = %self.session.pattern,
                    error = %e,
                    "Agent turn failed"
                );
                return None;
            }
        };

        if turn.text.trim().is_empty() {
            return None;
        }

        let reply = Message::new(
            &self.session.id,
            agent.id(),
            from,
            MessageKind::Response,
            turn.text.as_str(),
        )
        .with_parent(prompt_id);
        self.record(reply).await;

        Some(AgentOutput {
            agent_id: agent.id().to_string(),
            role_id: agent.role().id.clone(),
            content: turn.text,
        })
    }

    async fn record(&self, message: Message) {
        if let Err(e) = self.bus.record(message).await {
            warn!(session = %self.session.id, error = %e, "Could not record pattern message");
        }
    }
}

/// Run the pattern the session names. Agent-count checks happen here.
pub async fn dispatch(run: &PatternRun<'_>) -> PatternResult {
    let pattern = run.session.pattern;
    if run.agents.is_empty() {
        return PatternResult::failed(pattern, Vec::new(), "No agents available");
    }
    if run.agents.len() < pattern.min_agents() {
        return PatternResult::failed(
            pattern,
            Vec::new(),
            format!("Need at least {} agents", pattern.min_agents()),
        );
    }

    match pattern {
        OrchestrationPattern::Sequential => pipeline::sequential(run).await,
        OrchestrationPattern::Loop => pipeline::iterate(run).await,
        OrchestrationPattern::Parallel => fanout::parallel(run).await,
        OrchestrationPattern::Aggregator => fanout::aggregator(run).await,
        OrchestrationPattern::Hierarchical => delegation::hierarchical(run).await,
        OrchestrationPattern::Router => delegation::router(run).await,
        OrchestrationPattern::Network => network::network(run).await,
        OrchestrationPattern::HumanInLoop => human::human_in_loop(run).await,
    }
}

/// `[Label i]:\n<content>` blocks joined by `---` separators.
pub(crate) fn numbered(label: &str, outputs: &[AgentOutput]) -> String {
    outputs
        .iter()
        .enumerate()
        .map(|(i, o)| format!("[{label} {}]:\n{}", i + 1, o.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
