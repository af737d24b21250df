//! build, test and lint: run a project command inside the workspace.
//!
//! The guard classifies these as execute tools; roles without
//! `can_execute` never reach them.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::ToolOutput;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::registry::Tool;
use crate::workspace::{Workspace, required_str};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Output tail handed back to the model.
const MAX_OUTPUT_CHARS: usize = 3000;

pub struct CommandTool {
    name: String,
    description: String,
    workspace: Workspace,
    timeout: Duration,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, workspace: Workspace) -> Self {
        let name = name.into();
        Self {
            description: format!("Run a {name} command in the project workspace and report the result."),
            name,
            workspace,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The command to run, e.g. 'cargo test'" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let command = required_str(&arguments, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'command' must not be empty".into()));
        }

        debug!(tool = %self.name, command = %command, "Running workspace command");

        let mut process = shell(command);
        process.current_dir(self.workspace.root());
        let output = run(process, &self.name, self.timeout).await?;

        let label = self.name.to_uppercase();
        let status = if output.success {
            "SUCCESS".to_string()
        } else {
            warn!(tool = %self.name, command = %command, exit_code = output.code, "Command failed");
            format!("FAILED (exit {})", output.code)
        };
        Ok(ToolOutput {
            success: output.success,
            output: format!("[{label}] {status}\n$ {command}\n{}", tail(&output.text, MAX_OUTPUT_CHARS)),
        })
    }
}

pub(crate) struct ProcessOutput {
    pub success: bool,
    pub code: i32,
    /// stdout followed by stderr
    pub text: String,
}

fn shell(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// Run a prepared process with a deadline. The child is killed on expiry.
pub(crate) async fn run(
    mut command: Command,
    tool_name: &str,
    timeout: Duration,
) -> Result<ProcessOutput, ToolError> {
    command.kill_on_drop(true);
    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ToolError::ExecutionFailed {
                tool_name: tool_name.to_string(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(ToolError::Timeout {
                tool_name: tool_name.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        format!("{}\n{}", stdout.trim(), stderr.trim()).trim().to_string()
    };

    Ok(ProcessOutput {
        success: output.status.success(),
        code: output.status.code().unwrap_or(-1),
        text,
    })
}

/// The last `max` characters of `text`.
pub(crate) fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((i, _)) => &text[i..],
        None => text,
    }
}
