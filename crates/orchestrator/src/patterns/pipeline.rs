//! Order-driven patterns: a one-pass pipeline and an iterating loop.

use conclave_core::message::MessageKind;
use conclave_core::session::OrchestrationPattern;
use tracing::{debug, info};

use super::{AgentOutput, ORCHESTRATOR_ID, PatternResult, PatternRun};

/// Marker an agent emits when the loop's work is done.
pub const COMPLETE_MARKER: &str = "[COMPLETE]";

fn handoff(goal: &str, previous: &AgentOutput) -> String {
    format!(
        "Task: {goal}\n\nOutput from {} ({}):\n{}\n\nContinue the work from here.",
        previous.role_id, previous.agent_id, previous.content
    )
}

/// Agents act in list order, each receiving the previous agent's output.
pub async fn sequential(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::Sequential;
    let mut outputs: Vec<AgentOutput> = Vec::with_capacity(run.agents.len());

    for agent in run.agents {
        let prompt = match outputs.last() {
            Some(previous) => handoff(run.goal(), previous),
            None => run.goal().to_string(),
        };
        match run.ask(agent, ORCHESTRATOR_ID, MessageKind::Request, prompt).await {
            Some(output) => outputs.push(output),
            None => {
                let error = format!("No response from {}", agent.id());
                return PatternResult::failed(pattern, outputs, error);
            }
        }
    }

    PatternResult::ok(pattern, outputs)
}

/// Pass the work around the group until an agent marks it complete, an
/// iteration changes nothing, or the iteration ceiling is hit.
pub async fn iterate(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::Loop;
    let max_iterations = run.config.loop_max_iterations.max(1);
    let mut outputs: Vec<AgentOutput> = Vec::new();
    let mut current = run.goal().to_string();

    for iteration in 1..=max_iterations {
        let previous = current.clone();
        let mut complete = false;

        for agent in run.agents {
            let prompt = if outputs.is_empty() {
                current.clone()
            } else {
                format!(
                    "Task: {}\n\nIteration {iteration}/{max_iterations}. Current result:\n{current}\n\n\
                     Improve it. Reply with {COMPLETE_MARKER} when nothing is left to do.",
                    run.goal()
                )
            };
            let Some(output) = run.ask(agent, ORCHESTRATOR_ID, MessageKind::Request, prompt).await else {
                debug!(session = %run.session.id, agent = %agent.id(), iteration, "Loop agent produced nothing");
                continue;
            };
            complete = output.content.contains(COMPLETE_MARKER);
            current = output.content.clone();
            outputs.push(output);
            if complete {
                break;
            }
        }

        if complete {
            info!(session = %run.session.id, iteration, "Loop marked complete");
            break;
        }
        if current == previous {
            info!(session = %run.session.id, iteration, "Loop converged");
            break;
        }
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
    async fn pipeline_hands_output_forward() {
        let harness = Harness::new(vec![("analyst", "requirements list"), ("writer", "final doc")]);
        let result = harness
            .run(
                OrchestrationPattern::Sequential,
                &[role("analyst"), role("writer")],
                "write the spec",
            )
            .await;

        assert!(result.success);
        assert_eq!(result.final_output(), Some("final doc"));
        let prompts = harness.model.prompts_for("writer");
        assert!(prompts[0].contains("requirements list"));
        assert!(prompts[0].contains("Task: write the spec"));
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_stops_at_a_silent_agent() {
        let harness = Harness::new(vec![("analyst", "notes"), ("writer", ""), ("editor", "polished")]);
        let result = harness
            .run(
                OrchestrationPattern::Sequential,
                &[role("analyst"), role("writer"), role("editor")],
                "go",
            )
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().starts_with("No response from writer-"));
        assert_eq!(result.outputs.len(), 1);
        assert!(harness.model.prompts_for("editor").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_complete_marker() {
        let harness = Harness::new(vec![("coder", "v1"), ("reviewer", "")]);
        harness.model.script("coder", &["v1", "v2 [COMPLETE]"]);
        harness.model.script("reviewer", &["looks off, fix it"]);

        let result = harness
            .run(OrchestrationPattern::Loop, &[role("coder"), role("reviewer")], "build it")
            .await;

        assert!(result.success);
        assert_eq!(result.final_output(), Some("v2 [COMPLETE]"));
        assert_eq!(result.outputs.len(), 3);
        assert!(harness.model.prompts_for("reviewer").len() == 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_when_nothing_changes() {
        let harness = Harness::new(vec![("coder", "same answer")]);
        let result = harness
            .run(OrchestrationPattern::Loop, &[role("coder")], "build it")
            .await;

        assert!(result.success);
        assert_eq!(result.outputs.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_respects_the_iteration_ceiling() {
        let harness = Harness::new(vec![("coder", "")]);
        harness.model.script("coder", &["a", "b", "c", "d", "e"]);
        let mut config = harness.config.clone();
        config.loop_max_iterations = 3;

        let result = harness
            .run_with(OrchestrationPattern::Loop, &[role("coder")], "build it", config)
            .await;

        assert!(result.success);
        assert_eq!(result.outputs.len(), 3);
        assert_eq!(result.final_output(), Some("c"));
    }
}
