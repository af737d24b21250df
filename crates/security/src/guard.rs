//! The permission guard — consulted before every tool execution.
//!
//! Layers, in order, first denial wins:
//! 1. Tool ACL
//! 2. Write permission
//! 3. Execute permission
//! 4. Rate limit
//! 5. Path sandbox (file tools)
//! 6. Git path guard (git tools)
//!
//! Every denial is audited. Approvals leave no trace.

use chrono::Utc;
use conclave_config::GuardConfig;
use conclave_core::agent::AgentRole;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audit::{AuditLogger, PermissionDenial, TracingSink};
use crate::path::{expand_tilde, is_within, resolve_path};
use crate::policy::{GIT_PATH_TOOLS, ToolClass, always_denied_rule, matching_deny_pattern};
use crate::rate_limit::{RateLimitExceeded, RateLimiter, Usage};

/// One tool call awaiting a verdict.
#[derive(Debug, Clone, Copy)]
pub struct ToolRequest<'a> {
    pub agent_id: &'a str,
    pub session_id: &'a str,
    pub role: &'a AgentRole,
    pub tool_name: &'a str,
    pub arguments: &'a serde_json::Value,
}

/// A refused tool call. `Display` is the text handed back to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    message: String,
    reason: String,
    path: Option<String>,
}

impl Denial {
    fn new(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: reason.into(),
            path: None,
        }
    }

    fn at(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The rule that fired.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Denial {}

pub struct PermissionGuard {
    workspace: PathBuf,
    allowed_roots: Vec<PathBuf>,
    limiter: RateLimiter,
    audit: Arc<AuditLogger>,
}

impl PermissionGuard {
    /// A guard for `workspace` with default limits and a tracing audit sink.
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self::from_config(workspace, &GuardConfig::default())
    }

    pub fn from_config(workspace: impl AsRef<Path>, config: &GuardConfig) -> Self {
        let audit = if config.audit_to_log {
            AuditLogger::with_sinks(config.audit_capacity, vec![Box::new(TracingSink)])
        } else {
            AuditLogger::new(config.audit_capacity)
        };
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let workspace = resolve_path(workspace.as_ref(), &base);
        let allowed_roots = config
            .allowed_roots
            .iter()
            .map(|root| resolve_path(root, &workspace))
            .collect();

        Self {
            workspace,
            allowed_roots,
            limiter: RateLimiter::new(
                config.max_tool_calls_per_session,
                config.max_writes_per_session,
            ),
            audit: Arc::new(audit),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn usage(&self, agent_id: &str, session_id: &str) -> Usage {
        self.limiter.usage(agent_id, session_id)
    }

    /// Drop the rate-limit counters of a finished session.
    pub fn release_session(&self, session_id: &str) {
        self.limiter.release_session(session_id);
    }

    /// Evaluate every layer. `Ok(())` means the tool may run.
    pub fn check(&self, request: &ToolRequest<'_>) -> Result<(), Denial> {
        self.evaluate(request).inspect_err(|denial| {
            self.audit.log(PermissionDenial {
                agent_id: request.agent_id.to_string(),
                session_id: request.session_id.to_string(),
                tool_name: request.tool_name.to_string(),
                reason: denial.reason.clone(),
                path: denial.path.clone(),
                timestamp: Utc::now(),
            });
        })
    }

    fn evaluate(&self, request: &ToolRequest<'_>) -> Result<(), Denial> {
        let class = ToolClass::of(request.tool_name);
        let permissions = &request.role.permissions;

        // ── 1. Tool ACL ──
        if !request.role.allows_tool(request.tool_name) {
            return Err(Denial::new(
                format!(
                    "Permission denied: tool '{}' is not available to this agent.",
                    request.tool_name
                ),
                format!("Tool not in allowed_tools of role {}", request.role.id),
            ));
        }

        // ── 2. Write permission ──
        if class.is_write() && permissions.read_only {
            return Err(Denial::new(
                "Permission denied: this agent has read-only access.",
                "Agent is read-only",
            ));
        }

        // ── 3. Execute permission ──
        if class == ToolClass::Execute && !permissions.can_execute {
            return Err(Denial::new(
                "Permission denied: this agent cannot execute commands.",
                "Agent cannot execute commands",
            ));
        }

        // ── 4. Rate limit ──
        self.limiter
            .try_acquire(request.agent_id, request.session_id, class.is_write())
            .map_err(|exceeded| match exceeded {
                RateLimitExceeded::ToolCalls(max) => Denial::new(
                    format!("Permission denied: rate limit exceeded ({max} tool calls per session)."),
                    format!("Tool call ceiling of {max} reached"),
                ),
                RateLimitExceeded::Writes(max) => Denial::new(
                    format!("Permission denied: write limit exceeded ({max} writes per session)."),
                    format!("Write ceiling of {max} reached"),
                ),
            })?;

        // ── 5. Path sandbox ──
        if class.is_file()
            && let Some(raw) = string_arg(request.arguments, "path")
        {
            self.check_path(request.role, raw)?;
        }

        // ── 6. Git path guard ──
        if class.is_git() {
            self.check_git(request)?;
        }

        Ok(())
    }

    fn check_path(&self, role: &AgentRole, raw: &str) -> Result<(), Denial> {
        let resolved = resolve_path(&expand_tilde(raw), &self.workspace);
        let basename = resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| resolved.display().to_string());

        if let Some(rule) = always_denied_rule(&resolved) {
            return Err(Denial::new(
                format!("Permission denied: access to '{basename}' is restricted."),
                format!("Path matches {rule}"),
            )
            .at(&resolved));
        }

        if let Some(pattern) = matching_deny_pattern(&resolved, &role.permissions.denied_paths) {
            return Err(Denial::new(
                format!("Permission denied: access to '{basename}' is restricted for this agent."),
                format!("Path matches role denied_paths: {pattern}"),
            )
            .at(&resolved));
        }

        if !self.is_allowed_location(role, &resolved) {
            return Err(Denial::new(
                "Permission denied: path is outside the project workspace.",
                "Path outside workspace boundary",
            )
            .at(&resolved));
        }

        Ok(())
    }

    fn check_git(&self, request: &ToolRequest<'_>) -> Result<(), Denial> {
        let cwd = string_arg(request.arguments, "cwd")
            .map(|raw| resolve_path(&expand_tilde(raw), &self.workspace))
            .unwrap_or_else(|| self.workspace.clone());

        if !cwd.starts_with(&self.workspace) {
            return Err(Denial::new(
                "Permission denied: git operations require a working directory inside the project workspace.",
                "Git working directory outside workspace",
            )
            .at(&cwd));
        }

        if GIT_PATH_TOOLS.contains(&request.tool_name)
            && let Some(raw) = string_arg(request.arguments, "path")
        {
            let target = resolve_path(&expand_tilde(raw), &cwd);
            if !target.starts_with(&self.workspace) {
                return Err(Denial::new(
                    "Permission denied: path is outside the project workspace.",
                    "Git target path outside workspace",
                )
                .at(&target));
            }
        }

        Ok(())
    }

    fn is_allowed_location(&self, role: &AgentRole, path: &Path) -> bool {
        if path.starts_with(&self.workspace) || is_within(path, &self.allowed_roots) {
            return true;
        }
        let role_roots: Vec<PathBuf> = role
            .permissions
            .allowed_paths
            .iter()
            .map(|p| resolve_path(&expand_tilde(p), &self.workspace))
            .collect();
        is_within(path, &role_roots)
    }
}

impl std::fmt::Debug for PermissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGuard")
            .field("workspace", &self.workspace)
            .field("allowed_roots", &self.allowed_roots)
            .field("audit", &self.audit)
            .finish()
    }
}

fn string_arg<'a>(arguments: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        workspace: PathBuf,
        guard: PermissionGuard,
    }

    fn fixture_with(config: GuardConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("project");
        std::fs::create_dir_all(workspace.join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("outside")).unwrap();
        let guard = PermissionGuard::from_config(&workspace, &config);
        let workspace = workspace.canonicalize().unwrap();
        Fixture {
            _dir: dir,
            workspace,
            guard,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(GuardConfig {
            audit_to_log: false,
            ..GuardConfig::default()
        })
    }

    fn check(guard: &PermissionGuard, role: &AgentRole, tool: &str, args: serde_json::Value) -> Result<(), Denial> {
        guard.check(&ToolRequest {
            agent_id: "dev-1",
            session_id: "s1",
            role,
            tool_name: tool,
            arguments: &args,
        })
    }

    fn role() -> AgentRole {
        AgentRole::new("dev", "You write code.")
    }

    #[test]
    fn tool_acl_denies_unlisted_tools() {
        let f = fixture();
        let mut role = role();
        role.allowed_tools = Some(vec!["code_read".into()]);

        let denial = check(&f.guard, &role, "code_write", json!({"path": "src/a.rs"})).unwrap_err();
        assert_eq!(
            denial.to_string(),
            "Permission denied: tool 'code_write' is not available to this agent."
        );
        assert!(check(&f.guard, &role, "code_read", json!({"path": "src/a.rs"})).is_ok());
    }

    #[test]
    fn read_only_role_cannot_write_or_commit() {
        let f = fixture();
        let mut role = role();
        role.permissions.read_only = true;

        for tool in ["code_write", "code_edit", "git_commit"] {
            let denial = check(&f.guard, &role, tool, json!({"path": "src/a.rs"})).unwrap_err();
            assert_eq!(denial.message(), "Permission denied: this agent has read-only access.");
        }
        assert!(check(&f.guard, &role, "code_read", json!({"path": "src/a.rs"})).is_ok());
    }

    #[test]
    fn non_executing_role_cannot_build() {
        let f = fixture();
        let mut role = role();
        role.permissions.can_execute = false;

        let denial = check(&f.guard, &role, "build", json!({})).unwrap_err();
        assert_eq!(denial.message(), "Permission denied: this agent cannot execute commands.");
        assert!(check(&f.guard, &role, "list_files", json!({})).is_ok());
    }

    #[test]
    fn acl_wins_over_later_layers() {
        let f = fixture();
        let mut role = role();
        role.allowed_tools = Some(vec![]);
        role.permissions.read_only = true;

        let denial = check(&f.guard, &role, "code_write", json!({"path": ".env"})).unwrap_err();
        assert!(denial.message().contains("not available"));
    }

    #[test]
    fn rate_limit_after_exact_ceiling() {
        let f = fixture_with(GuardConfig {
            max_tool_calls_per_session: 5,
            max_writes_per_session: 2,
            audit_to_log: false,
            ..GuardConfig::default()
        });
        let role = role();

        for _ in 0..5 {
            check(&f.guard, &role, "git_status", json!({})).unwrap();
        }
        let denial = check(&f.guard, &role, "code_read", json!({"path": "src/a.rs"})).unwrap_err();
        assert!(denial.message().contains("rate limit exceeded (5 tool calls per session)"));
    }

    #[test]
    fn write_limit_leaves_reads_open() {
        let f = fixture_with(GuardConfig {
            max_tool_calls_per_session: 50,
            max_writes_per_session: 2,
            audit_to_log: false,
            ..GuardConfig::default()
        });
        let role = role();

        check(&f.guard, &role, "code_write", json!({"path": "src/a.rs"})).unwrap();
        check(&f.guard, &role, "git_commit", json!({})).unwrap();
        let denial = check(&f.guard, &role, "code_edit", json!({"path": "src/a.rs"})).unwrap_err();
        assert!(denial.message().contains("write limit exceeded"));
        assert!(check(&f.guard, &role, "code_read", json!({"path": "src/a.rs"})).is_ok());
        assert_eq!(f.guard.usage("dev-1", "s1"), Usage { tool_calls: 3, writes: 2 });
    }

    #[test]
    fn traversal_to_secret_env_hits_always_denied_rule() {
        let f = fixture();
        let denial =
            check(&f.guard, &role(), "code_read", json!({"path": "../outside/secret.env"})).unwrap_err();
        assert_eq!(denial.message(), "Permission denied: access to 'secret.env' is restricted.");
        assert!(denial.reason().contains("always-denied"));
    }

    #[test]
    fn absolute_path_inside_workspace_is_allowed() {
        let f = fixture();
        let inside = f.workspace.join("src").join("main.rs");
        let args = json!({"path": inside.display().to_string()});
        assert!(check(&f.guard, &role(), "code_read", args).is_ok());
    }

    #[test]
    fn path_outside_workspace_is_denied() {
        let f = fixture();
        let denial =
            check(&f.guard, &role(), "code_write", json!({"path": "../outside/notes.md"})).unwrap_err();
        assert_eq!(denial.message(), "Permission denied: path is outside the project workspace.");
    }

    #[test]
    fn role_allowed_paths_extend_the_sandbox() {
        let f = fixture();
        let mut role = role();
        role.permissions.allowed_paths = vec!["../outside".into()];
        assert!(check(&f.guard, &role, "code_read", json!({"path": "../outside/notes.md"})).is_ok());
    }

    #[test]
    fn role_denied_paths_apply() {
        let f = fixture();
        let mut role = role();
        role.permissions.denied_paths = vec!["*.lock".into()];
        let denial = check(&f.guard, &role, "code_write", json!({"path": "Cargo.lock"})).unwrap_err();
        assert_eq!(
            denial.message(),
            "Permission denied: access to 'Cargo.lock' is restricted for this agent."
        );
    }

    #[test]
    fn secrets_directory_denied_even_inside_workspace() {
        let f = fixture();
        let denial =
            check(&f.guard, &role(), "code_read", json!({"path": "secrets/db.yaml"})).unwrap_err();
        assert!(denial.message().contains("'db.yaml' is restricted"));
    }

    #[test]
    fn git_cwd_must_be_inside_workspace() {
        let f = fixture();
        assert!(check(&f.guard, &role(), "git_status", json!({})).is_ok());
        assert!(check(&f.guard, &role(), "git_log", json!({"cwd": "src"})).is_ok());

        let denial = check(&f.guard, &role(), "git_status", json!({"cwd": "../outside"})).unwrap_err();
        assert!(denial.message().contains("git operations require"));
    }

    #[test]
    fn git_diff_validates_target_path() {
        let f = fixture();
        assert!(check(&f.guard, &role(), "git_diff", json!({"path": "src/lib.rs"})).is_ok());
        let denial =
            check(&f.guard, &role(), "git_diff", json!({"path": "../../etc/passwd"})).unwrap_err();
        assert_eq!(denial.message(), "Permission denied: path is outside the project workspace.");
    }

    #[test]
    fn denials_are_audited_and_approvals_are_not() {
        let f = fixture();
        check(&f.guard, &role(), "code_read", json!({"path": "src/a.rs"})).unwrap();
        assert_eq!(f.guard.audit().count(), 0);

        let _ = check(&f.guard, &role(), "code_read", json!({"path": ".env"}));
        let recent = f.guard.audit().recent_denials(10, None);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].agent_id, "dev-1");
        assert_eq!(recent[0].tool_name, "code_read");
        assert!(recent[0].path.as_deref().is_some_and(|p| p.ends_with(".env")));
    }
}
