//! Lexical checks for externally supplied path fragments.
//!
//! These run before a fragment is joined onto a base directory. The
//! symlink-aware containment check lives in `io::workspace`, since it needs
//! the filesystem.

use std::fmt;

/// A path fragment or resolved path refused for safety reasons.
///
/// Always fatal: ralph never normalizes a rejected path into an accepted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRejection {
    /// What the path was for (e.g. `worktree name`).
    pub context: String,
    /// The offending value as given.
    pub value: String,
    pub reason: String,
}

impl fmt::Display for PathRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} {:?}: {}",
            self.context, self.value, self.reason
        )
    }
}

impl std::error::Error for PathRejection {}

/// Reject absolute paths and any `..` token. The empty string means "not provided".
pub fn validate_component(path: &str, context: &str) -> Result<(), PathRejection> {
    if path.is_empty() {
        return Ok(());
    }
    if path.starts_with('/') || path.starts_with(std::path::MAIN_SEPARATOR) {
        return Err(PathRejection {
            context: context.to_string(),
            value: path.to_string(),
            reason: "must be a relative path".to_string(),
        });
    }
    if path.contains("..") {
        return Err(PathRejection {
            context: context.to_string(),
            value: path.to_string(),
            reason: "must not contain '..'".to_string(),
        });
    }
    Ok(())
}
