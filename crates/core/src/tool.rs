//! Tool capability — how agents act on the project workspace.
//!
//! Tools are never called directly by agents. The runtime asks the permission
//! guard first and only reaches the [`ToolExecutor`] when no denial came back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ToolError;

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Name and one-line description of a tool, as shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// Executes named tools with JSON arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name.
    async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Names of the tools this executor knows about.
    fn tool_names(&self) -> Vec<String>;

    fn specs(&self) -> Vec<ToolSpec> {
        self.tool_names()
            .into_iter()
            .map(|name| ToolSpec {
                name,
                description: String::new(),
            })
            .collect()
    }
}
