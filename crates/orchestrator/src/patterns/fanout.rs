//! Fan-out patterns: every agent on the same goal, optionally merged by a
//! synthesizer.

use conclave_agent::AgentRuntime;
use conclave_core::message::MessageKind;
use conclave_core::session::OrchestrationPattern;
use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

use super::{AgentOutput, ORCHESTRATOR_ID, PatternResult, PatternRun, numbered};

/// Ask every agent concurrently. Failed or silent agents are left out.
async fn gather(run: &PatternRun<'_>, agents: &[Arc<AgentRuntime>]) -> Vec<AgentOutput> {
    let answers = join_all(
        agents
            .iter()
            .map(|agent| run.ask(agent, ORCHESTRATOR_ID, MessageKind::Request, run.goal())),
    )
    .await;
    answers.into_iter().flatten().collect()
}

pub async fn parallel(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::Parallel;
    let outputs = gather(run, run.agents).await;
    info!(
        session = %run.session.id,
        answered = outputs.len(),
        agents = run.agents.len(),
        "Parallel round finished"
    );
    if outputs.is_empty() {
        return PatternResult::failed(pattern, outputs, "No agent produced output");
    }
    PatternResult::ok(pattern, outputs)
}

/// Workers propose in parallel, the last agent synthesizes.
pub async fn aggregator(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::Aggregator;
    let Some((synthesizer, workers)) = run.agents.split_last() else {
        return PatternResult::failed(pattern, Vec::new(), "No agents available");
    };

    let mut outputs = gather(run, workers).await;
    if outputs.is_empty() {
        return PatternResult::failed(pattern, outputs, "Worker phase failed");
    }

    let prompt = format!(
        "Synthesize these {} proposals into a single coherent result:\n\n{}",
        outputs.len(),
        numbered("Agent", &outputs)
    );
    match run.ask(synthesizer, ORCHESTRATOR_ID, MessageKind::Request, prompt).await {
        Some(synthesis) => {
            outputs.push(synthesis);
            PatternResult::ok(pattern, outputs)
        }
        None => PatternResult::failed(pattern, outputs, "Synthesizer produced no result"),
    }
}
