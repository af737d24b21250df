//! Human-in-the-loop: one agent drafts, a human gate signs off at each
//! configured checkpoint.

use async_trait::async_trait;
use conclave_core::message::MessageKind;
use conclave_core::session::{OrchestrationPattern, Session};
use tracing::info;

use super::{HUMAN_ID, ORCHESTRATOR_ID, PatternResult, PatternRun};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approve,
    /// Re-run the agent with this feedback
    Refine(String),
    /// Stop the session
    Reject(String),
}

/// External confirmation at a checkpoint.
#[async_trait]
pub trait HumanGate: Send + Sync {
    async fn review(&self, checkpoint: &str, session: &Session, draft: &str) -> GateDecision;
}

/// Approves every checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl HumanGate for AutoApprove {
    async fn review(&self, _checkpoint: &str, _session: &Session, _draft: &str) -> GateDecision {
        GateDecision::Approve
    }
}

pub async fn human_in_loop(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::HumanInLoop;
    let Some(agent) = run.agents.first() else {
        return PatternResult::failed(pattern, Vec::new(), "No agents available");
    };

    let Some(draft) = run.ask(agent, ORCHESTRATOR_ID, MessageKind::Request, run.goal()).await else {
        return PatternResult::failed(pattern, Vec::new(), "Agent returned no response");
    };
    let mut current = draft.content.clone();
    let mut outputs = vec![draft];

    for checkpoint in &run.config.human_checkpoints {
        // The agent sits paused while the human decides
        agent.pause();
        let decision = match run.gate {
            Some(gate) => gate.review(checkpoint, run.session, &current).await,
            None => GateDecision::Approve,
        };
        agent.resume();
        info!(session = %run.session.id, checkpoint = %checkpoint, decision = ?decision, "Checkpoint reviewed");

        match decision {
            GateDecision::Approve => {}
            GateDecision::Reject(reason) => {
                return PatternResult::failed(pattern, outputs, format!("Rejected at {checkpoint}: {reason}"));
            }
            GateDecision::Refine(feedback) => {
                let prompt = format!("Feedback on {checkpoint}: {feedback}");
                match run.ask(agent, HUMAN_ID, MessageKind::Request, prompt).await {
                    Some(revised) => {
                        current = revised.content.clone();
                        outputs.push(revised);
                    }
                    None => {
                        let error = format!("No response from {}", agent.id());
                        return PatternResult::failed(pattern, outputs, error);
                    }
                }
            }
        }
    }

    PatternResult::ok(pattern, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Harness, ScriptedGate, role};
    use conclave_core::agent::AgentStatus;
    use conclave_core::event::ObserverEvent;

    #[tokio::test(start_paused = true)]
    async fn no_gate_auto_approves() {
        let harness = Harness::new(vec![("writer", "draft")]);
        let result = harness
            .run(OrchestrationPattern::HumanInLoop, &[role("writer")], "write")
            .await;
        assert!(result.success);
        assert_eq!(result.final_output(), Some("draft"));
    }

    #[tokio::test(start_paused = true)]
    async fn refinement_reruns_with_feedback() {
        let harness = Harness::new(vec![("writer", "")]);
        harness.model.script("writer", &["draft one", "draft two"]);
        let gate = ScriptedGate::new(vec![GateDecision::Refine("shorter please".into())]);
        let mut observer = harness.services.bus.observe();

        let result = harness
            .run_gated(OrchestrationPattern::HumanInLoop, &[role("writer")], "write", &gate)
            .await;

        assert!(result.success);
        assert_eq!(result.final_output(), Some("draft two"));
        assert_eq!(gate.seen(), vec![("review".to_string(), "draft one".to_string())]);
        let feedback = &harness.model.prompts_for("writer")[1];
        assert!(feedback.ends_with("Feedback on review: shorter please"));

        let mut paused = false;
        while let Ok(event) = observer.try_recv() {
            if let ObserverEvent::StatusChanged { to: AgentStatus::Paused, .. } = event {
                paused = true;
            }
        }
        assert!(paused);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_fails_with_the_reason() {
        let harness = Harness::new(vec![("writer", "draft")]);
        let gate = ScriptedGate::new(vec![GateDecision::Reject("off topic".into())]);
        let result = harness
            .run_gated(OrchestrationPattern::HumanInLoop, &[role("writer")], "write", &gate)
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Rejected at review: off topic"));
    }

    #[tokio::test(start_paused = true)]
    async fn every_checkpoint_is_reviewed() {
        let harness = Harness::new(vec![("writer", "draft")]);
        let gate = ScriptedGate::new(vec![GateDecision::Approve, GateDecision::Approve]);
        let mut config = harness.config.clone();
        config.human_checkpoints = vec!["outline".into(), "final".into()];

        let result = harness
            .run_full(OrchestrationPattern::HumanInLoop, &[role("writer")], "write", config, Some(&gate))
            .await;
        assert!(result.success);
        let checkpoints: Vec<String> = gate.seen().into_iter().map(|(c, _)| c).collect();
        assert_eq!(checkpoints, vec!["outline", "final"]);
    }
}
