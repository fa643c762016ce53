//! Workspace resolution: which directory the agent works in for this run.
//!
//! Sources, first match wins:
//! 1. an explicit worktree name (`<root>/.worktree/<name>`, must exist),
//! 2. the requirements file's `branchName` (same location, skipped if missing),
//! 3. the caller's current directory.

use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use crate::core::path::{PathRejection, validate_component};
use crate::error::ConfigError;

/// Directory under the install root holding pre-created worktrees.
pub const WORKTREE_DIR: &str = ".worktree";

/// Where the workspace came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceSource {
    Worktree(String),
    BranchName(String),
    CurrentDir,
}

/// The resolved working directory for the run. Fixed once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLocation {
    pub path: PathBuf,
    pub source: WorkspaceSource,
}

/// Inputs to [`resolve_workspace`].
#[derive(Debug, Clone)]
pub struct WorkspaceRequest<'a> {
    pub install_root: &'a Path,
    pub caller_dir: &'a Path,
    /// `--worktree` value, if given.
    pub worktree: Option<&'a str>,
    /// `branchName` read from the requirements file, if any.
    pub branch_name: Option<&'a str>,
}

/// Resolve the workspace directory.
///
/// Path rejections and a missing explicit worktree are errors; a missing
/// branch-name worktree falls through to the caller's directory.
pub fn resolve_workspace(request: &WorkspaceRequest<'_>) -> Result<WorkspaceLocation> {
    let base = request.install_root.join(WORKTREE_DIR);

    if let Some(name) = request.worktree.filter(|name| !name.is_empty()) {
        let path = worktree_candidate(&base, name, "worktree name")?;
        if !path.is_dir() {
            return Err(ConfigError::new(format!(
                "worktree not found: {}",
                path.display()
            ))
            .into());
        }
        info!(path = %path.display(), "using worktree from --worktree");
        return Ok(WorkspaceLocation {
            path,
            source: WorkspaceSource::Worktree(name.to_string()),
        });
    }

    if let Some(branch) = request.branch_name.filter(|name| !name.is_empty()) {
        let path = worktree_candidate(&base, branch, "branch name")?;
        if path.is_dir() {
            info!(path = %path.display(), branch, "using worktree from branchName");
            return Ok(WorkspaceLocation {
                path,
                source: WorkspaceSource::BranchName(branch.to_string()),
            });
        }
        debug!(path = %path.display(), "no worktree for branchName, using current directory");
    }

    Ok(WorkspaceLocation {
        path: request.caller_dir.to_path_buf(),
        source: WorkspaceSource::CurrentDir,
    })
}

/// Validate `name`, join it under `base`, then check the result stays under `base`.
fn worktree_candidate(base: &Path, name: &str, context: &str) -> Result<PathBuf> {
    validate_component(name, context)?;
    let candidate = base.join(name);
    validate_within_base(&candidate, base, context)?;
    Ok(candidate)
}

/// Reject `path` unless, after following symlinks, it lies inside `base`.
///
/// Returns the canonical form of `path`. Trailing components that do not
/// exist yet are appended lexically onto their deepest existing ancestor.
pub fn validate_within_base(
    path: &Path,
    base: &Path,
    context: &str,
) -> Result<PathBuf, PathRejection> {
    let reject = |reason: String| PathRejection {
        context: context.to_string(),
        value: path.display().to_string(),
        reason,
    };
    let resolved_base =
        canonicalize_lenient(base).map_err(|err| reject(format!("cannot resolve base: {err}")))?;
    let resolved = canonicalize_lenient(path).map_err(|err| reject(format!("cannot resolve: {err}")))?;
    if !resolved.starts_with(&resolved_base) {
        return Err(reject(format!(
            "resolves to {} outside {}",
            resolved.display(),
            resolved_base.display()
        )));
    }
    Ok(resolved)
}

fn canonicalize_lenient(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                let mut out = resolved;
                for component in missing.iter().rev() {
                    out.push(component);
                }
                return Ok(out);
            }
            Err(err) => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(err);
                };
                missing.push(name.to_os_string());
                existing = parent;
            }
        }
    }
}

/// Switch the process working directory to the workspace for the rest of the run.
pub fn enter_workspace(location: &WorkspaceLocation) -> Result<()> {
    if location
        .path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(ConfigError::new(format!(
            "workspace path must be normalized: {}",
            location.path.display()
        ))
        .into());
    }
    std::env::set_current_dir(&location.path).map_err(|err| {
        ConfigError::new(format!(
            "cannot enter workspace {}: {err}",
            location.path.display()
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn request<'a>(
        root: &'a Path,
        worktree: Option<&'a str>,
        branch_name: Option<&'a str>,
    ) -> WorkspaceRequest<'a> {
        WorkspaceRequest {
            install_root: root,
            caller_dir: root,
            worktree,
            branch_name,
        }
    }

    #[test]
    fn explicit_worktree_must_exist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_workspace(&request(temp.path(), Some("missing"), None)).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
        assert!(err.to_string().contains("worktree not found"));
    }

    #[test]
    fn explicit_worktree_wins_over_branch_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join(".worktree/explicit")).expect("mkdir");
        fs::create_dir_all(root.join(".worktree/feature/x")).expect("mkdir");

        let location =
            resolve_workspace(&request(root, Some("explicit"), Some("feature/x"))).expect("resolve");
        assert_eq!(location.source, WorkspaceSource::Worktree("explicit".to_string()));
        assert!(location.path.ends_with(".worktree/explicit"));
    }

    #[test]
    fn branch_name_selects_existing_worktree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join(".worktree/feature/x")).expect("mkdir");

        let location = resolve_workspace(&request(root, None, Some("feature/x"))).expect("resolve");
        assert_eq!(
            location.source,
            WorkspaceSource::BranchName("feature/x".to_string())
        );
        assert!(location.path.ends_with(".worktree/feature/x"));
    }

    #[test]
    fn missing_branch_worktree_falls_back_to_caller_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let location =
            resolve_workspace(&request(temp.path(), None, Some("feature/x"))).expect("resolve");
        assert_eq!(location.source, WorkspaceSource::CurrentDir);
        assert_eq!(location.path, temp.path());
    }

    #[test]
    fn traversal_in_branch_name_is_fatal_even_if_target_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("install");
        fs::create_dir_all(root.join(".worktree")).expect("mkdir");
        fs::create_dir_all(temp.path().join("etc")).expect("mkdir");

        let err = resolve_workspace(&request(&root, None, Some("../../etc"))).unwrap_err();
        let rejection = err.downcast_ref::<PathRejection>().expect("path rejection");
        assert_eq!(rejection.context, "branch name");
    }

    #[test]
    fn absolute_worktree_name_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_workspace(&request(temp.path(), Some("/tmp"), None)).unwrap_err();
        assert!(err.downcast_ref::<PathRejection>().is_some());
    }

    #[test]
    fn no_sources_uses_caller_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let location = resolve_workspace(&request(temp.path(), None, None)).expect("resolve");
        assert_eq!(location.source, WorkspaceSource::CurrentDir);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_base_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("install");
        let outside = temp.path().join("outside");
        fs::create_dir_all(root.join(".worktree")).expect("mkdir");
        fs::create_dir_all(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, root.join(".worktree/evil")).expect("symlink");

        assert!(validate_component("evil", "worktree name").is_ok());
        let err = validate_within_base(
            &root.join(".worktree/evil"),
            &root.join(".worktree"),
            "worktree name",
        )
        .unwrap_err();
        assert!(err.reason.contains("outside"));

        let err = resolve_workspace(&request(&root, Some("evil"), None)).unwrap_err();
        assert!(err.downcast_ref::<PathRejection>().is_some());
    }

    #[test]
    fn within_base_accepts_missing_descendants() {
        let temp = tempfile::tempdir().expect("tempdir");
        let base = temp.path().join(".worktree");
        fs::create_dir_all(&base).expect("mkdir");
        let resolved =
            validate_within_base(&base.join("not/yet"), &base, "branch name").expect("inside");
        assert!(resolved.ends_with("not/yet"));
    }
}
