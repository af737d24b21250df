//! code_read: read a file from the workspace.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::ToolOutput;

use crate::registry::Tool;
use crate::workspace::{Workspace, required_str};

const DEFAULT_MAX_LINES: usize = 500;

pub struct CodeReadTool {
    workspace: Workspace,
}

impl CodeReadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CodeReadTool {
    fn name(&self) -> &str {
        "code_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use this to explore project files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute or workspace-relative file path" },
                "max_lines": { "type": "integer", "description": "Max lines to read (default 500)" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let raw = required_str(&arguments, "path")?;
        let max_lines = arguments["max_lines"]
            .as_u64()
            .map_or(DEFAULT_MAX_LINES, |n| n.max(1) as usize);
        let path = self.workspace.resolve(raw);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolOutput::failed(format!("Failed to read file: {e}"))),
        };

        let total = content.lines().count();
        if total <= max_lines {
            return Ok(ToolOutput::ok(content));
        }

        let mut head: String = content
            .lines()
            .take(max_lines)
            .collect::<Vec<_>>()
            .join("\n");
        head.push_str(&format!("\n... ({} more lines)", total - max_lines));
        Ok(ToolOutput::ok(head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_relative_to_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "Hello, world!\n").unwrap();

        let tool = CodeReadTool::new(Workspace::new(dir.path()));
        let out = tool.execute(serde_json::json!({"path": "notes.md"})).await.unwrap();
        assert!(out.success);
        assert!(out.output.contains("Hello, world!"));
    }

    #[tokio::test]
    async fn truncates_long_files() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (0..10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("long.txt"), body).unwrap();

        let tool = CodeReadTool::new(Workspace::new(dir.path()));
        let out = tool
            .execute(serde_json::json!({"path": "long.txt", "max_lines": 3}))
            .await
            .unwrap();
        assert!(out.output.starts_with("line 0\nline 1\nline 2"));
        assert!(out.output.ends_with("(7 more lines)"));
    }

    #[tokio::test]
    async fn missing_file_is_a_failed_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CodeReadTool::new(Workspace::new(dir.path()));
        let out = tool.execute(serde_json::json!({"path": "nope.rs"})).await.unwrap();
        assert!(!out.success);
        assert!(out.output.contains("Failed to read file"));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let tool = CodeReadTool::new(Workspace::new("/tmp"));
        let result = tool.execute(serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
