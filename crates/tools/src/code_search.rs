//! code_search: regex search over workspace files.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::ToolOutput;
use regex_lite::Regex;
use std::path::{Path, PathBuf};

use crate::list_files::SKIPPED_DIRS;
use crate::registry::Tool;
use crate::workspace::{Workspace, required_str};

const MAX_MATCHES: usize = 100;
const MAX_LINE_CHARS: usize = 200;
const MAX_FILE_BYTES: u64 = 1024 * 1024;

pub struct CodeSearchTool {
    workspace: Workspace,
}

impl CodeSearchTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CodeSearchTool {
    fn name(&self) -> &str {
        "code_search"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern in project files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex pattern to search for" },
                "path": { "type": "string", "description": "Directory to search in (default: workspace root)" },
                "glob": { "type": "string", "description": "File name filter, e.g. '*.rs'" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let pattern = required_str(&arguments, "pattern")?;
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid pattern: {e}")))?;
        let filter = match arguments["glob"].as_str().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                glob::Pattern::new(raw)
                    .map_err(|e| ToolError::InvalidArguments(format!("Invalid glob: {e}")))?,
            ),
            None => None,
        };

        let raw = arguments["path"].as_str().filter(|s| !s.trim().is_empty()).unwrap_or(".");
        let root = self.workspace.resolve(raw);
        let workspace = self.workspace.clone();

        let matches = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            collect_files(&root, &mut files);
            files.sort();

            let mut matches = Vec::new();
            for file in files {
                if filter.as_ref().is_some_and(|f| !matches_name(f, &file)) {
                    continue;
                }
                search_file(&regex, &file, &workspace, &mut matches);
                if matches.len() >= MAX_MATCHES {
                    break;
                }
            }
            matches
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "code_search".into(),
            reason: e.to_string(),
        })?;

        if matches.is_empty() {
            return Ok(ToolOutput::ok(format!("No matches for '{pattern}'")));
        }
        let mut out = matches.join("\n");
        if matches.len() >= MAX_MATCHES {
            out.push_str(&format!("\n... (stopped after {MAX_MATCHES} matches)"));
        }
        Ok(ToolOutput::ok(out))
    }
}

fn matches_name(filter: &glob::Pattern, file: &Path) -> bool {
    file.file_name()
        .is_some_and(|n| filter.matches(&n.to_string_lossy()))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    if dir.is_file() {
        out.push(dir.to_path_buf());
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = entry.file_name();
            if !SKIPPED_DIRS.contains(&name.to_string_lossy().as_ref()) {
                collect_files(&path, out);
            }
        } else if entry.metadata().is_ok_and(|m| m.len() <= MAX_FILE_BYTES) {
            out.push(path);
        }
    }
}

fn search_file(regex: &Regex, file: &Path, workspace: &Workspace, matches: &mut Vec<String>) {
    // binary and unreadable files are skipped
    let Ok(content) = std::fs::read_to_string(file) else {
        return;
    };
    let shown = workspace.display(file);
    for (i, line) in content.lines().enumerate() {
        if regex.is_match(line) {
            let text: String = line.trim().chars().take(MAX_LINE_CHARS).collect();
            matches.push(format!("{shown}:{}: {text}", i + 1));
            if matches.len() >= MAX_MATCHES {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "alpha release\n").unwrap();
        std::fs::write(dir.path().join("target/out.rs"), "fn alpha() {}\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = fixture();
        let tool = CodeSearchTool::new(Workspace::new(dir.path().canonicalize().unwrap()));
        let out = tool.execute(serde_json::json!({"pattern": "alpha"})).await.unwrap();
        assert_eq!(out.output, "README.md:1: alpha release\nsrc/lib.rs:1: pub fn alpha() {}");
    }

    #[tokio::test]
    async fn glob_filters_by_file_name() {
        let dir = fixture();
        let tool = CodeSearchTool::new(Workspace::new(dir.path().canonicalize().unwrap()));
        let out = tool
            .execute(serde_json::json!({"pattern": r"fn \w+", "glob": "*.rs"}))
            .await
            .unwrap();
        assert_eq!(out.output.lines().count(), 2);
        assert!(!out.output.contains("README"));
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let tool = CodeSearchTool::new(Workspace::new("/tmp"));
        let result = tool.execute(serde_json::json!({"pattern": "("})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn no_matches_is_success() {
        let dir = fixture();
        let tool = CodeSearchTool::new(Workspace::new(dir.path()));
        let out = tool.execute(serde_json::json!({"pattern": "gamma"})).await.unwrap();
        assert!(out.success);
        assert!(out.output.starts_with("No matches"));
    }
}
