//! All-to-all rounds. Every agent answers each round having seen what every
//! other agent said in the previous one.

use conclave_core::message::{Message, MessageKind};
use conclave_core::session::OrchestrationPattern;
use futures::future::join_all;
use tracing::{info, warn};

use super::{AgentOutput, ORCHESTRATOR_ID, PatternResult, PatternRun};

/// Marker an agent emits when it agrees with the group.
pub const CONSENSUS_MARKER: &str = "[CONSENSUS]";

pub async fn network(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::Network;
    let rounds = run.config.network_rounds.max(1);
    let mut outputs: Vec<AgentOutput> = Vec::new();
    let mut summary: Option<String> = None;

    for round in 1..=rounds {
        let prompt = match &summary {
            None => format!("Round {round}/{rounds}. Share your current thinking on: {}", run.goal()),
            Some(previous) => format!(
                "Round {round}/{rounds}. Share your current thinking on: {}\n\n\
                 What everyone said last round:\n{previous}\n\n\
                 Reply with {CONSENSUS_MARKER} once you agree with the group.",
                run.goal()
            ),
        };

        let answers: Vec<AgentOutput> = join_all(
            run.agents
                .iter()
                .map(|agent| run.ask(agent, ORCHESTRATOR_ID, MessageKind::Request, prompt.as_str())),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        let agreed = answers.len() == run.agents.len()
            && answers.iter().all(|a| a.content.contains(CONSENSUS_MARKER));

        let text = answers
            .iter()
            .map(|a| format!("[{}]: {}", a.role_id, a.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        outputs.extend(answers);

        if agreed {
            info!(session = %run.session.id, round, "Network reached consensus");
            break;
        }

        let recap = Message::broadcast(
            &run.session.id,
            ORCHESTRATOR_ID,
            MessageKind::Inform,
            format!("Round {round} summary:\n{text}"),
        )
        .with_metadata("round", round.to_string())
        .from_pattern(pattern.as_str());
        if let Err(e) = run.bus.record(recap).await {
            warn!(session = %run.session.id, error = %e, "Could not record round summary");
        }
        summary = Some(text);
    }

    if outputs.is_empty() {
        return PatternResult::failed(pattern, outputs, "No agent produced output");
    }
    PatternResult::ok(pattern, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Harness, role};

    #[tokio::test(start_paused = true)]
    async fn rounds_run_to_the_limit() {
        let harness = Harness::new(vec![("a", "idea from a"), ("b", "idea from b")]);
        let mut config = harness.config.clone();
        config.network_rounds = 3;

        let result = harness
            .run_with(OrchestrationPattern::Network, &[role("a"), role("b")], "pick a name", config)
            .await;

        assert!(result.success);
        assert_eq!(result.outputs.len(), 6);
        let prompts = harness.model.prompts_for("a");
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("[b]: idea from b"));
        assert!(prompts[2].contains("Round 3/3"));
    }

    #[tokio::test(start_paused = true)]
    async fn consensus_ends_early() {
        let harness = Harness::new(vec![("a", ""), ("b", "")]);
        harness.model.script("a", &["maybe X", "X it is [CONSENSUS]"]);
        harness.model.script("b", &["maybe Y", "fine, X [CONSENSUS]"]);

        let result = harness
            .run(OrchestrationPattern::Network, &[role("a"), role("b")], "pick a name")
            .await;

        assert!(result.success);
        assert_eq!(result.outputs.len(), 4);
        assert_eq!(harness.model.prompts_for("a").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_consensus_keeps_going() {
        let harness = Harness::new(vec![("a", "agreed [CONSENSUS]"), ("b", "")]);
        harness.model.script("b", &["no", "still no"]);
        let mut config = harness.config.clone();
        config.network_rounds = 2;

        let result = harness
            .run_with(OrchestrationPattern::Network, &[role("a"), role("b")], "pick", config)
            .await;
        assert_eq!(harness.model.prompts_for("a").len(), 2);
        assert_eq!(result.outputs.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn round_summaries_are_recorded() {
        let harness = Harness::new(vec![("a", "thought")]);
        let mut config = harness.config.clone();
        config.network_rounds = 2;
        harness
            .run_with(OrchestrationPattern::Network, &[role("a")], "pick", config)
            .await;

        let history = harness.history().await;
        let recaps: Vec<&Message> = history.iter().filter(|m| m.kind == MessageKind::Inform).collect();
        assert_eq!(recaps.len(), 2);
        assert!(recaps[0].content.starts_with("Round 1 summary:\n[a]: thought"));
        assert!(recaps[0].is_broadcast());
    }
}
