//! Built-in tool implementations for Conclave.
//!
//! Every tool is scoped to a project workspace: relative paths resolve
//! against the workspace root and processes run inside it. Tools do no
//! authorization of their own; the permission guard runs before any of
//! them is reached.

pub mod code_search;
pub mod command;
pub mod file_read;
pub mod file_write;
pub mod git;
pub mod list_files;
pub mod registry;
pub mod workspace;

pub use registry::{Tool, ToolRegistry};
pub use workspace::Workspace;

use std::path::Path;

/// A registry with every built-in tool bound to `root`.
///
/// `build`, `test` and `lint` take the command to run as an argument.
pub fn default_registry(root: impl AsRef<Path>) -> ToolRegistry {
    let workspace = Workspace::new(root);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(file_read::CodeReadTool::new(workspace.clone())));
    registry.register(Box::new(file_write::CodeWriteTool::new(workspace.clone())));
    registry.register(Box::new(file_write::CodeEditTool::new(workspace.clone())));
    registry.register(Box::new(list_files::ListFilesTool::new(workspace.clone())));
    registry.register(Box::new(code_search::CodeSearchTool::new(workspace.clone())));
    for op in git::GitOp::ALL {
        registry.register(Box::new(git::GitTool::new(op, workspace.clone())));
    }
    for name in ["build", "test", "lint"] {
        registry.register(Box::new(command::CommandTool::new(name, workspace.clone())));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::tool::ToolExecutor;

    #[test]
    fn default_registry_covers_workspace_tools() {
        let registry = default_registry("/tmp");
        let names = registry.tool_names();
        for expected in [
            "build", "code_edit", "code_read", "code_search", "code_write", "git_commit",
            "git_diff", "git_log", "git_status", "lint", "list_files", "test",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(names.len(), 12);
    }
}
