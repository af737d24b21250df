//! list_files: a bounded tree view of a workspace directory.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::ToolOutput;
use std::path::Path;

use crate::registry::Tool;
use crate::workspace::Workspace;

const DEFAULT_DEPTH: usize = 2;
const MAX_FILES_PER_DIR: usize = 50;
const MAX_DIRS_PER_DIR: usize = 20;
const MAX_LINES: usize = 200;

/// Directories never worth showing to a model.
pub(crate) const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__"];

pub struct ListFilesTool {
    workspace: Workspace,
}

impl ListFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories at a given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path to list (default: workspace root)" },
                "depth": { "type": "integer", "description": "Max depth (default 2)" }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let raw = arguments["path"].as_str().filter(|s| !s.trim().is_empty()).unwrap_or(".");
        let depth = arguments["depth"]
            .as_u64()
            .map_or(DEFAULT_DEPTH, |d| d.max(1) as usize);
        let path = self.workspace.resolve(raw);

        if path.is_file() {
            return Ok(ToolOutput::failed(format!(
                "'{raw}' is a file, not a directory. Use code_read to view it."
            )));
        }
        if !path.is_dir() {
            return Ok(ToolOutput::failed(format!("Not a directory: {raw}")));
        }

        let lines = tokio::task::spawn_blocking(move || {
            let mut lines = Vec::new();
            walk(&path, 0, depth, &mut lines);
            lines
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "list_files".into(),
            reason: e.to_string(),
        })?;

        if lines.is_empty() {
            return Ok(ToolOutput::ok("Empty directory"));
        }
        Ok(ToolOutput::ok(lines.join("\n")))
    }
}

fn walk(dir: &Path, level: usize, max_depth: usize, lines: &mut Vec<String>) {
    if level >= max_depth || lines.len() >= MAX_LINES {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.path().is_dir() {
            if !SKIPPED_DIRS.contains(&name.as_str()) {
                dirs.push(name);
            }
        } else {
            files.push(name);
        }
    }
    files.sort();
    dirs.sort();

    let indent = "  ".repeat(level);
    for name in files.iter().take(MAX_FILES_PER_DIR) {
        if lines.len() >= MAX_LINES {
            return;
        }
        lines.push(format!("{indent}{name}"));
    }
    for name in dirs.iter().take(MAX_DIRS_PER_DIR) {
        if lines.len() >= MAX_LINES {
            return;
        }
        lines.push(format!("{indent}{name}/"));
        walk(&dir.join(name), level + 1, max_depth, lines);
    }
}
