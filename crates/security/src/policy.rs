//! Tool classes and the always-denied path rules.
//!
//! The class of a tool decides which guard layers apply to it: write and
//! execute flags, the write budget, the path sandbox and the git guard.

use glob::Pattern;
use std::path::Path;

pub const FILE_READ_TOOLS: &[&str] = &["code_read", "code_search", "list_files"];
pub const FILE_WRITE_TOOLS: &[&str] = &["code_write", "code_edit"];
pub const GIT_READ_TOOLS: &[&str] = &["git_status", "git_log", "git_diff"];
pub const GIT_WRITE_TOOLS: &[&str] = &["git_commit"];
pub const EXEC_TOOLS: &[&str] = &[
    "build",
    "test",
    "lint",
    "docker_build",
    "deploy_azure",
    "playwright_test",
    "chaos_test",
    "tmc_load_test",
    "sast_scan",
    "dependency_audit",
    "secrets_scan",
];

/// Git tools that take an explicit target path.
pub const GIT_PATH_TOOLS: &[&str] = &["git_diff"];

const DENIED_BASENAMES: &[&str] = &[".env", "id_rsa", "id_ed25519"];
const DENIED_EXTENSIONS: &[&str] = &["pem"];
const DENIED_SEGMENTS: &[&str] = &["secrets"];
const DENIED_PATTERNS: &[&str] = &[".env.*", "*.env", "*secret*key*"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    FileRead,
    FileWrite,
    GitRead,
    GitWrite,
    Execute,
    Other,
}

impl ToolClass {
    pub fn of(tool_name: &str) -> Self {
        if FILE_READ_TOOLS.contains(&tool_name) {
            Self::FileRead
        } else if FILE_WRITE_TOOLS.contains(&tool_name) {
            Self::FileWrite
        } else if GIT_READ_TOOLS.contains(&tool_name) {
            Self::GitRead
        } else if GIT_WRITE_TOOLS.contains(&tool_name) {
            Self::GitWrite
        } else if EXEC_TOOLS.contains(&tool_name) {
            Self::Execute
        } else {
            Self::Other
        }
    }

    /// Counts against the write budget and is refused to read-only roles.
    pub fn is_write(self) -> bool {
        matches!(self, Self::FileWrite | Self::GitWrite)
    }

    /// Subject to the path sandbox.
    pub fn is_file(self) -> bool {
        matches!(self, Self::FileRead | Self::FileWrite)
    }

    pub fn is_git(self) -> bool {
        matches!(self, Self::GitRead | Self::GitWrite)
    }
}

/// The always-denied rule a path matches, if any. Applies regardless of
/// configuration or role.
pub fn always_denied_rule(path: &Path) -> Option<String> {
    let basename = path.file_name().map(|n| n.to_string_lossy().to_string());

    if let Some(name) = &basename {
        if DENIED_BASENAMES.contains(&name.as_str()) {
            return Some(format!("always-denied basename '{name}'"));
        }
        for pattern in DENIED_PATTERNS {
            if Pattern::new(pattern).is_ok_and(|p| p.matches(name)) {
                return Some(format!("always-denied pattern '{pattern}'"));
            }
        }
    }

    if let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase())
        && DENIED_EXTENSIONS.contains(&ext.as_str())
    {
        return Some(format!("always-denied extension '.{ext}'"));
    }

    for component in path.components() {
        let segment = component.as_os_str().to_string_lossy();
        if DENIED_SEGMENTS.contains(&segment.as_ref()) {
            return Some(format!("always-denied directory '{segment}'"));
        }
    }

    None
}

/// The first role deny pattern matching the full path or its basename.
pub fn matching_deny_pattern<'a>(path: &Path, patterns: &'a [String]) -> Option<&'a str> {
    let full = path.to_string_lossy();
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    patterns.iter().map(String::as_str).find(|raw| match Pattern::new(raw) {
        Ok(pattern) => pattern.matches(&full) || pattern.matches(&basename),
        Err(e) => {
            tracing::warn!(pattern = %raw, error = %e, "Ignoring invalid deny pattern");
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tools() {
        assert_eq!(ToolClass::of("code_read"), ToolClass::FileRead);
        assert_eq!(ToolClass::of("code_edit"), ToolClass::FileWrite);
        assert_eq!(ToolClass::of("git_log"), ToolClass::GitRead);
        assert_eq!(ToolClass::of("git_commit"), ToolClass::GitWrite);
        assert_eq!(ToolClass::of("sast_scan"), ToolClass::Execute);
        assert_eq!(ToolClass::of("weather"), ToolClass::Other);

        assert!(ToolClass::GitWrite.is_write());
        assert!(!ToolClass::GitWrite.is_file());
        assert!(ToolClass::FileRead.is_file());
    }

    #[test]
    fn denied_basenames_and_patterns() {
        assert!(always_denied_rule(Path::new("/w/.env")).is_some());
        assert!(always_denied_rule(Path::new("/w/.env.production")).is_some());
        assert!(always_denied_rule(Path::new("/w/secret.env")).is_some());
        assert!(always_denied_rule(Path::new("/home/u/.ssh/id_rsa")).is_some());
        assert!(always_denied_rule(Path::new("/w/my_secret_key.txt")).is_some());
    }

    #[test]
    fn denied_extension_and_segment() {
        let rule = always_denied_rule(Path::new("/w/certs/server.PEM")).unwrap();
        assert!(rule.contains(".pem"));
        let rule = always_denied_rule(Path::new("/w/secrets/config.yaml")).unwrap();
        assert!(rule.contains("secrets"));
    }

    #[test]
    fn ordinary_paths_allowed() {
        assert!(always_denied_rule(Path::new("/w/src/main.rs")).is_none());
        assert!(always_denied_rule(Path::new("/w/environment.md")).is_none());
        assert!(always_denied_rule(Path::new("/w/docs/secrets.md")).is_none());
    }

    #[test]
    fn role_deny_patterns_match_basename_or_full_path() {
        let patterns = vec!["*.lock".to_string(), "/w/vendor/*".to_string()];
        assert_eq!(matching_deny_pattern(Path::new("/w/Cargo.lock"), &patterns), Some("*.lock"));
        assert_eq!(
            matching_deny_pattern(Path::new("/w/vendor/x.rs"), &patterns),
            Some("/w/vendor/*")
        );
        assert!(matching_deny_pattern(Path::new("/w/src/x.rs"), &patterns).is_none());
    }

    #[test]
    fn invalid_deny_pattern_is_ignored() {
        let patterns = vec!["[".to_string()];
        assert!(matching_deny_pattern(Path::new("/w/a"), &patterns).is_none());
    }
}
