//! Git adapter used to label the progress ledger with the current branch.
//!
//! The loop never mutates the repository; the agent owns commits.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Branch label used when the workspace is not a git checkout.
pub const UNKNOWN_BRANCH: &str = "unknown";

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name. Works on unborn branches.
    ///
    /// A detached HEAD is reported as `detached@<short-sha>`.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        if let Ok(out) = self.run_capture(&["symbolic-ref", "--short", "-q", "HEAD"]) {
            let name = out.trim().to_string();
            if !name.is_empty() {
                debug!(branch = %name, "current branch");
                return Ok(name);
            }
        }
        let sha = self.run_capture(&["rev-parse", "--short", "HEAD"])?;
        Ok(format!("detached@{}", sha.trim()))
    }

    /// Current branch, or [`UNKNOWN_BRANCH`] when git cannot tell.
    pub fn branch_label(&self) -> String {
        match self.current_branch() {
            Ok(name) => name,
            Err(err) => {
                debug!(err = %err, "branch detection failed");
                UNKNOWN_BRANCH.to_string()
            }
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
