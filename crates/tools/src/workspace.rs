//! The project root every tool is bound to.

use conclave_security::path::{expand_tilde, resolve_path};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path argument. Relative paths are joined to the root.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        resolve_path(&expand_tilde(raw), &self.root)
    }

    /// The `cwd` argument of a process tool, or the root.
    pub fn cwd(&self, arguments: &serde_json::Value) -> PathBuf {
        match arguments.get("cwd").and_then(|v| v.as_str()) {
            Some(raw) if !raw.trim().is_empty() => self.resolve(raw),
            _ => self.root.clone(),
        }
    }

    /// Display `path` relative to the root when it lies inside it.
    pub fn display(&self, path: &Path) -> String {
        let root = resolve_path(&self.root, Path::new("/"));
        path.strip_prefix(&root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, conclave_core::error::ToolError> {
    arguments[key].as_str().ok_or_else(|| {
        conclave_core::error::ToolError::InvalidArguments(format!("Missing '{key}' argument"))
    })
}
