//! Patterns where agent 0 leads: a manager that decomposes and integrates,
//! and a router that picks one specialist.

use conclave_agent::AgentRuntime;
use conclave_core::message::MessageKind;
use conclave_core::session::OrchestrationPattern;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{AgentOutput, ORCHESTRATOR_ID, PatternResult, PatternRun, numbered};

pub async fn hierarchical(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::Hierarchical;
    let Some((manager, workers)) = run.agents.split_first() else {
        return PatternResult::failed(pattern, Vec::new(), "No agents available");
    };

    let prompt = format!(
        "Decompose this task into {} subtasks (one per worker). Format as JSON array of strings.\n\nTask: {}",
        workers.len(),
        run.goal()
    );
    let Some(plan) = run.ask(manager, ORCHESTRATOR_ID, MessageKind::Request, prompt).await else {
        return PatternResult::failed(pattern, Vec::new(), "Manager decomposition failed");
    };

    let subtasks = subtasks_from(&plan.content);
    debug!(session = %run.session.id, subtasks = subtasks.len(), workers = workers.len(), "Manager plan parsed");

    let assignments = workers.iter().enumerate().map(|(i, worker)| {
        let task = match subtasks.get(i) {
            Some(subtask) => format!("{subtask}\n\nOverall goal: {}", run.goal()),
            None => run.goal().to_string(),
        };
        run.ask(worker, manager.id(), MessageKind::Delegate, task)
    });
    let mut outputs: Vec<AgentOutput> = join_all(assignments).await.into_iter().flatten().collect();
    if outputs.is_empty() {
        return PatternResult::failed(pattern, outputs, "Worker phase failed");
    }

    let prompt = format!("Integrate these worker results:\n\n{}", numbered("Worker", &outputs));
    match run.ask(manager, ORCHESTRATOR_ID, MessageKind::Request, prompt).await {
        Some(integrated) => {
            outputs.push(integrated);
            PatternResult::ok(pattern, outputs)
        }
        None => PatternResult::failed(pattern, outputs, "Manager integration failed"),
    }
}

/// Subtasks from a manager answer: the JSON array between the first `[` and
/// the last `]`. Non-string entries are kept in their JSON form. Anything
/// unparsable yields no subtasks.
fn subtasks_from(answer: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (answer.find('['), answer.rfind(']')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<serde_json::Value>>(&answer[start..=end]) {
        Ok(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub async fn router(run: &PatternRun<'_>) -> PatternResult {
    let pattern = OrchestrationPattern::Router;
    let Some((router, specialists)) = run.agents.split_first() else {
        return PatternResult::failed(pattern, Vec::new(), "No agents available");
    };

    let names = specialists
        .iter()
        .map(|s| s.role().id.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let prompt = format!(
        "Classify this task and choose ONE specialist from: [{names}]\n\
         Respond with ONLY the specialist name.\n\nTask: {}",
        run.goal()
    );
    let Some(choice) = run.ask(router, ORCHESTRATOR_ID, MessageKind::Request, prompt).await else {
        return PatternResult::failed(pattern, Vec::new(), "Router returned no response");
    };

    let specialist = match pick_specialist(&choice.content, specialists) {
        Some(specialist) => specialist,
        None => {
            let Some(fallback) = specialists.first() else {
                return PatternResult::failed(pattern, vec![choice], "Need at least 2 agents");
            };
            warn!(
                session = %run.session.id,
                choice = %choice.content.trim(),
                fallback = %fallback.role().id,
                "Router chose an unknown specialist, using the first"
            );
            fallback
        }
    };
    info!(session = %run.session.id, specialist = %specialist.id(), "Task routed");

    let mut outputs = vec![choice];
    match run.ask(specialist, router.id(), MessageKind::Delegate, run.goal()).await {
        Some(answer) => {
            outputs.push(answer);
            PatternResult::ok(pattern, outputs)
        }
        None => PatternResult::failed(pattern, outputs, format!("No response from {}", specialist.id())),
    }
}

/// Loose match of the router's answer against role ids and names.
fn pick_specialist<'a>(answer: &str, specialists: &'a [Arc<AgentRuntime>]) -> Option<&'a Arc<AgentRuntime>> {
    let chosen = answer.trim().trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
    if chosen.is_empty() {
        return None;
    }
    specialists.iter().find(|agent| {
        let role = agent.role();
        [role.id.as_str(), role.name.as_str()]
            .into_iter()
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase)
            .any(|name| chosen.contains(&name) || name.contains(&chosen))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Harness, role};

    #[test]
    fn subtasks_from_fenced_json() {
        let answer = "Here you go:\n```json\n[\"research\", \"write\"]\n```";
        assert_eq!(subtasks_from(answer), vec!["research", "write"]);
        assert_eq!(subtasks_from("[1, {\"a\": 2}]"), vec!["1", "{\"a\":2}"]);
        assert!(subtasks_from("no plan here").is_empty());
        assert!(subtasks_from("] backwards [").is_empty());
        assert!(subtasks_from("[not json]").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manager_decomposes_and_integrates() {
        let harness = Harness::new(vec![
            ("manager", ""),
            ("worker1", "section on scope"),
            ("worker2", "section on risks"),
        ]);
        harness.model.script(
            "manager",
            &[
                "[\"write scope\", \"write risks\"]",
                "Spec combining section on scope and section on risks",
            ],
        );

        let result = harness
            .run(
                OrchestrationPattern::Hierarchical,
                &[role("manager"), role("worker1"), role("worker2")],
                "draft a spec",
            )
            .await;

        assert!(result.success);
        let final_output = result.final_output().unwrap();
        assert!(final_output.contains("section on scope"));
        assert!(final_output.contains("section on risks"));

        assert!(harness.model.prompts_for("worker1")[0].contains("write scope"));
        assert!(harness.model.prompts_for("worker2")[0].contains("write risks"));
        let integrate = &harness.model.prompts_for("manager")[1];
        assert!(integrate.contains("[Worker 1]:"));
        assert!(integrate.contains("[Worker 2]:"));
    }

    #[tokio::test(start_paused = true)]
    async fn unparsable_plan_gives_every_worker_the_goal() {
        let harness = Harness::new(vec![("manager", "just do it"), ("worker", "done")]);
        let result = harness
            .run(OrchestrationPattern::Hierarchical, &[role("manager"), role("worker")], "ship v2")
            .await;
        assert!(result.success);
        let prompt = &harness.model.prompts_for("worker")[0];
        assert!(prompt.ends_with("ship v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_manager_fails_decomposition() {
        let harness = Harness::new(vec![("manager", ""), ("worker", "done")]);
        let result = harness
            .run(OrchestrationPattern::Hierarchical, &[role("manager"), role("worker")], "ship")
            .await;
        assert_eq!(result.error.as_deref(), Some("Manager decomposition failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn router_forwards_to_the_chosen_specialist() {
        let harness = Harness::new(vec![
            ("triage", "Security."),
            ("frontend", "css fix"),
            ("security", "patched the auth bypass"),
        ]);
        let result = harness
            .run(
                OrchestrationPattern::Router,
                &[role("triage"), role("frontend"), role("security")],
                "fix the login bypass",
            )
            .await;

        assert!(result.success);
        assert_eq!(result.final_output(), Some("patched the auth bypass"));
        assert!(harness.model.prompts_for("frontend").is_empty());
        let classify = &harness.model.prompts_for("triage")[0];
        assert!(classify.contains("[frontend, security]"));

        let history = harness.history().await;
        let delegation = history
            .iter()
            .find(|m| m.kind == MessageKind::Delegate)
            .unwrap();
        assert!(delegation.from_agent.starts_with("triage-"));
        assert!(delegation.to_agent.as_deref().unwrap().starts_with("security-"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_choice_defaults_to_first_specialist() {
        let harness = Harness::new(vec![("triage", "nobody"), ("frontend", "css fix"), ("backend", "api fix")]);
        let result = harness
            .run(
                OrchestrationPattern::Router,
                &[role("triage"), role("frontend"), role("backend")],
                "fix it",
            )
            .await;
        assert_eq!(result.final_output(), Some("css fix"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_router_fails() {
        let harness = Harness::new(vec![("triage", ""), ("frontend", "css fix")]);
        let result = harness
            .run(OrchestrationPattern::Router, &[role("triage"), role("frontend")], "fix it")
            .await;
        assert_eq!(result.error.as_deref(), Some("Router returned no response"));
    }
}
