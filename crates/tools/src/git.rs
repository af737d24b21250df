//! git_status, git_log, git_diff and git_commit.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::ToolOutput;
use std::time::Duration;
use tokio::process::Command;

use crate::command::{run, tail};
use crate::registry::Tool;
use crate::workspace::{Workspace, required_str};

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DIFF_CHARS: usize = 8000;
const DEFAULT_LOG_LIMIT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOp {
    Status,
    Log,
    Diff,
    Commit,
}

impl GitOp {
    pub const ALL: [GitOp; 4] = [Self::Status, Self::Log, Self::Diff, Self::Commit];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Status => "git_status",
            Self::Log => "git_log",
            Self::Diff => "git_diff",
            Self::Commit => "git_commit",
        }
    }
}

pub struct GitTool {
    op: GitOp,
    workspace: Workspace,
}

impl GitTool {
    pub fn new(op: GitOp, workspace: Workspace) -> Self {
        Self { op, workspace }
    }

    async fn git(&self, cwd: &std::path::Path, args: &[&str]) -> Result<ToolOutput, ToolError> {
        let mut command = Command::new("git");
        command.arg("-C").arg(cwd).args(args);
        let output = run(command, self.op.tool_name(), GIT_TIMEOUT).await?;
        let text = if output.text.is_empty() && output.success {
            "(no output)".to_string()
        } else {
            tail(&output.text, MAX_DIFF_CHARS).to_string()
        };
        Ok(ToolOutput {
            success: output.success,
            output: text,
        })
    }
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        self.op.tool_name()
    }

    fn description(&self) -> &str {
        match self.op {
            GitOp::Status => "Show git status of the project.",
            GitOp::Log => "Show recent git commits.",
            GitOp::Diff => "Show git diff of uncommitted changes, optionally for one file.",
            GitOp::Commit => "Stage all changes and commit them with a message.",
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let cwd = serde_json::json!({ "type": "string", "description": "Working directory (default: project root)" });
        match self.op {
            GitOp::Status => serde_json::json!({
                "type": "object",
                "properties": { "cwd": cwd }
            }),
            GitOp::Log => serde_json::json!({
                "type": "object",
                "properties": {
                    "cwd": cwd,
                    "limit": { "type": "integer", "description": "Number of commits (default 10)" }
                }
            }),
            GitOp::Diff => serde_json::json!({
                "type": "object",
                "properties": {
                    "cwd": cwd,
                    "path": { "type": "string", "description": "Specific file to diff" }
                }
            }),
            GitOp::Commit => serde_json::json!({
                "type": "object",
                "properties": {
                    "cwd": cwd,
                    "message": { "type": "string", "description": "Commit message" }
                },
                "required": ["message"]
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let cwd = self.workspace.cwd(&arguments);
        match self.op {
            GitOp::Status => self.git(&cwd, &["status", "--short", "--branch"]).await,
            GitOp::Log => {
                let limit = arguments["limit"].as_u64().unwrap_or(DEFAULT_LOG_LIMIT).max(1);
                let limit = limit.to_string();
                self.git(&cwd, &["log", "--oneline", "-n", &limit]).await
            }
            GitOp::Diff => match arguments["path"].as_str().filter(|s| !s.trim().is_empty()) {
                Some(raw) => {
                    let target = self.workspace.resolve(raw);
                    let target = target.to_string_lossy();
                    self.git(&cwd, &["diff", "--", &target]).await
                }
                None => self.git(&cwd, &["diff"]).await,
            },
            GitOp::Commit => {
                let message = required_str(&arguments, "message")?;
                if message.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("'message' must not be empty".into()));
                }
                let staged = self.git(&cwd, &["add", "-A"]).await?;
                if !staged.success {
                    return Ok(staged);
                }
                self.git(&cwd, &["commit", "-m", message]).await
            }
        }
    }
}
