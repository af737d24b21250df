//! code_write and code_edit: change files in the workspace.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::ToolOutput;
use std::path::Path;

use crate::registry::Tool;
use crate::workspace::{Workspace, required_str};

pub struct CodeWriteTool {
    workspace: Workspace,
}

impl CodeWriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CodeWriteTool {
    fn name(&self) -> &str {
        "code_write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to write" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let raw = required_str(&arguments, "path")?;
        let content = required_str(&arguments, "content")?;
        let path = self.workspace.resolve(raw);

        if let Err(e) = ensure_parent(&path).await {
            return Ok(ToolOutput::failed(format!("Failed to create directory: {e}")));
        }

        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolOutput::ok(format!(
                "Wrote {} bytes to {}",
                content.len(),
                self.workspace.display(&path)
            ))),
            Err(e) => Ok(ToolOutput::failed(format!("Failed to write file: {e}"))),
        }
    }
}

pub struct CodeEditTool {
    workspace: Workspace,
}

impl CodeEditTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CodeEditTool {
    fn name(&self) -> &str {
        "code_edit"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of a string in a file (surgical edit)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" },
                "old_str": { "type": "string", "description": "Exact string to find and replace" },
                "new_str": { "type": "string", "description": "Replacement string" }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let raw = required_str(&arguments, "path")?;
        let old_str = required_str(&arguments, "old_str")?;
        let new_str = required_str(&arguments, "new_str")?;
        if old_str.is_empty() {
            return Err(ToolError::InvalidArguments("'old_str' must not be empty".into()));
        }

        let path = self.workspace.resolve(raw);
        let shown = self.workspace.display(&path);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolOutput::failed(format!("Failed to read file: {e}"))),
        };

        match content.matches(old_str).count() {
            0 => Ok(ToolOutput::failed(format!("old_str not found in {shown}"))),
            1 => {
                let updated = content.replacen(old_str, new_str, 1);
                match tokio::fs::write(&path, updated).await {
                    Ok(()) => Ok(ToolOutput::ok(format!("Edited {shown}"))),
                    Err(e) => Ok(ToolOutput::failed(format!("Failed to write file: {e}"))),
                }
            }
            n => Ok(ToolOutput::failed(format!(
                "old_str matches {n} times in {shown}; include more surrounding context"
            ))),
        }
    }
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}
