//! Path resolution for the workspace sandbox.
//!
//! Paths are resolved against the workspace, symlinks are followed for the
//! longest existing prefix, and the remainder (which may not exist yet, as
//! for writes) is normalized lexically. Containment is checked per path
//! component, never by string prefix.

use std::path::{Component, Path, PathBuf};

/// Resolve `path` against `base` the way the sandbox sees it.
pub fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    for ancestor in joined.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            let remainder = joined.strip_prefix(ancestor).unwrap_or(Path::new(""));
            return normalize(&canonical.join(remainder));
        }
    }

    normalize(&joined)
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Whether `path` lies inside any of `roots` (component-wise).
pub fn is_within(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Expand ~ to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return PathBuf::from(path.replacen('~', &home, 1));
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
    }

    #[test]
    fn relative_paths_join_the_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let resolved = resolve_path(Path::new("src/new_file.rs"), &base);
        assert_eq!(resolved, base.join("src/new_file.rs"));
    }

    #[test]
    fn parent_escape_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("ws");
        std::fs::create_dir(&workspace).unwrap();
        let workspace = workspace.canonicalize().unwrap();

        let resolved = resolve_path(Path::new("../outside/secret.env"), &workspace);
        assert!(!resolved.starts_with(&workspace));
        assert!(resolved.ends_with("outside/secret.env"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_followed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let workspace = root.join("ws");
        let outside = root.join("outside");
        std::fs::create_dir(&workspace).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, workspace.join("link")).unwrap();

        let resolved = resolve_path(Path::new("link/data.txt"), &workspace);
        assert_eq!(resolved, outside.join("data.txt"));
        assert!(!is_within(&resolved, &[workspace]));
    }

    #[test]
    fn containment_is_component_wise() {
        let roots = vec![PathBuf::from("/srv/app")];
        assert!(is_within(Path::new("/srv/app/src/lib.rs"), &roots));
        assert!(is_within(Path::new("/srv/app"), &roots));
        assert!(!is_within(Path::new("/srv/application/x"), &roots));
    }

    #[test]
    fn tilde_expansion_leaves_plain_paths() {
        assert_eq!(expand_tilde("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
