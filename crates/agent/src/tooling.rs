//! Guarded tool execution.
//!
//! Every call goes through the permission guard first. A denial never reaches
//! the executor; its text is handed back to the model as the observation.

use conclave_core::agent::AgentRole;
use conclave_core::tool::{ToolExecutor, ToolSpec};
use conclave_security::{PermissionGuard, ToolRequest};
use std::sync::Arc;
use tracing::{debug, info};

use crate::actions::ToolCall;

/// Longest tool output shown to the model.
const MAX_OBSERVATION_CHARS: usize = 4000;

/// What the model is told about one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub tool: String,
    pub text: String,
    pub denied: bool,
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]\n{}", self.tool, self.text)
    }
}

#[derive(Clone)]
pub struct GuardedTools {
    guard: Arc<PermissionGuard>,
    executor: Arc<dyn ToolExecutor>,
}

impl GuardedTools {
    pub fn new(guard: Arc<PermissionGuard>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self { guard, executor }
    }

    pub fn guard(&self) -> &Arc<PermissionGuard> {
        &self.guard
    }

    /// Tools the role may ask for.
    pub fn specs_for(&self, role: &AgentRole) -> Vec<ToolSpec> {
        self.executor
            .specs()
            .into_iter()
            .filter(|spec| role.allows_tool(&spec.name))
            .collect()
    }

    pub async fn call(
        &self,
        agent_id: &str,
        session_id: &str,
        role: &AgentRole,
        call: &ToolCall,
    ) -> Observation {
        let request = ToolRequest {
            agent_id,
            session_id,
            role,
            tool_name: &call.name,
            arguments: &call.arguments,
        };

        if let Err(denial) = self.guard.check(&request) {
            return Observation {
                tool: call.name.clone(),
                text: denial.to_string(),
                denied: true,
            };
        }

        let text = match self.executor.execute(&call.name, call.arguments.clone()).await {
            Ok(output) => {
                debug!(agent = %agent_id, tool = %call.name, success = output.success, "Tool executed");
                output.output
            }
            Err(e) => {
                info!(agent = %agent_id, tool = %call.name, error = %e, "Tool failed");
                format!("Error: {e}")
            }
        };

        Observation {
            tool: call.name.clone(),
            text: clip(text),
            denied: false,
        }
    }

    /// Run up to `limit` calls in order. Calls past the limit are reported,
    /// not executed.
    pub async fn call_all(
        &self,
        agent_id: &str,
        session_id: &str,
        role: &AgentRole,
        calls: &[ToolCall],
        limit: usize,
    ) -> Vec<Observation> {
        let mut observations = Vec::with_capacity(calls.len());
        for (i, call) in calls.iter().enumerate() {
            if i >= limit {
                observations.push(Observation {
                    tool: call.name.clone(),
                    text: format!("Skipped: at most {limit} tool calls per turn."),
                    denied: true,
                });
                continue;
            }
            observations.push(self.call(agent_id, session_id, role, call).await);
        }
        observations
    }
}

fn clip(text: String) -> String {
    if text.chars().count() <= MAX_OBSERVATION_CHARS {
        return text;
    }
    let kept: String = text.chars().take(MAX_OBSERVATION_CHARS).collect();
    format!("{kept}\n... (truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::EchoTools;
    use serde_json::json;

    fn tools(dir: &std::path::Path) -> (GuardedTools, Arc<EchoTools>) {
        let echo = Arc::new(EchoTools::default());
        let guard = Arc::new(PermissionGuard::new(dir));
        (GuardedTools::new(guard, echo.clone()), echo)
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn approved_call_reaches_the_executor() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, echo) = tools(dir.path());
        let role = AgentRole::new("dev", "p");

        let obs = tools
            .call("a1", "s1", &role, &call("code_read", json!({"path": "src/lib.rs"})))
            .await;
        assert!(!obs.denied);
        assert!(obs.text.starts_with("code_read ran with"));
        assert_eq!(echo.calls().len(), 1);
    }

    #[tokio::test]
    async fn denied_call_never_executes() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, echo) = tools(dir.path());
        let mut role = AgentRole::new("reviewer", "p");
        role.permissions.read_only = true;

        let obs = tools
            .call("a1", "s1", &role, &call("code_write", json!({"path": "x.rs", "content": ""})))
            .await;
        assert!(obs.denied);
        assert_eq!(obs.text, "Permission denied: this agent has read-only access.");
        assert!(echo.calls().is_empty());
        assert_eq!(tools.guard().audit().count(), 1);
    }

    #[tokio::test]
    async fn executor_errors_become_observations() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, _) = tools(dir.path());
        let obs = tools
            .call("a1", "s1", &AgentRole::new("dev", "p"), &call("missing", json!({})))
            .await;
        assert!(!obs.denied);
        assert_eq!(obs.text, "Error: Tool not found: missing");
    }

    #[tokio::test]
    async fn calls_past_the_limit_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, echo) = tools(dir.path());
        let calls = vec![
            call("git_status", json!({})),
            call("git_status", json!({})),
            call("git_status", json!({})),
        ];
        let obs = tools
            .call_all("a1", "s1", &AgentRole::new("dev", "p"), &calls, 2)
            .await;
        assert_eq!(obs.len(), 3);
        assert!(obs[2].text.starts_with("Skipped"));
        assert_eq!(echo.calls().len(), 2);
    }

    #[test]
    fn specs_follow_the_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, _) = tools(dir.path());
        let mut role = AgentRole::new("dev", "p");
        role.allowed_tools = Some(vec!["code_read".into()]);
        let names: Vec<String> = tools.specs_for(&role).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["code_read"]);
    }
}
