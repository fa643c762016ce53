//! Test-only helpers: scripted agents, fixture installs, and ready-made configurations.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tempfile::TempDir;

use crate::core::completion::contains_signal;
use crate::core::mode::RunMode;
use crate::io::agent::{Agent, AgentRequest, AgentRun};
use crate::io::config::{CONFIG_RELATIVE_PATH, RalphConfig};
use crate::io::workspace::{WORKTREE_DIR, WorkspaceLocation, WorkspaceSource};
use crate::run_config::RunConfiguration;

/// One scripted agent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedRun {
    pub output: Vec<u8>,
    pub output_truncated: usize,
    /// The signal appeared in the part of the output that was dropped.
    pub signal_past_limit: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ScriptedRun {
    /// Successful run printing `output`.
    pub fn ok(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            output_truncated: 0,
            signal_past_limit: false,
            exit_code: Some(0),
            timed_out: false,
        }
    }

    pub fn failed(output: impl Into<Vec<u8>>, exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::ok(output)
        }
    }

    /// Run killed at the timeout after printing `output`.
    pub fn timed_out(output: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: None,
            timed_out: true,
            ..Self::ok(output)
        }
    }

    /// Successful run whose capture kept `output` and dropped `dropped` bytes.
    pub fn truncated(output: impl Into<Vec<u8>>, dropped: usize, signal_past_limit: bool) -> Self {
        Self {
            output_truncated: dropped,
            signal_past_limit,
            ..Self::ok(output)
        }
    }
}

/// Agent that replays queued responses and records what it was asked.
///
/// Once the queue is drained the last response repeats.
#[derive(Debug)]
pub struct ScriptedAgent {
    runs: RefCell<VecDeque<ScriptedRun>>,
    last: RefCell<Option<ScriptedRun>>,
    prompts: RefCell<Vec<Vec<u8>>>,
    workdirs: RefCell<Vec<PathBuf>>,
    calls: Cell<u32>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            last: RefCell::new(None),
            prompts: RefCell::new(Vec::new()),
            workdirs: RefCell::new(Vec::new()),
            calls: Cell::new(0),
        }
    }

    /// Agent that never emits the completion signal.
    pub fn never_completes() -> Self {
        Self::new(vec![ScriptedRun::ok("still working\n")])
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    pub fn prompts(&self) -> Vec<Vec<u8>> {
        self.prompts.borrow().clone()
    }

    pub fn workdirs(&self) -> Vec<PathBuf> {
        self.workdirs.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        self.calls.set(self.calls.get() + 1);
        self.prompts.borrow_mut().push(request.prompt.clone());
        self.workdirs.borrow_mut().push(request.workdir.clone());

        let next = self.runs.borrow_mut().pop_front();
        let run = match next {
            Some(run) => {
                *self.last.borrow_mut() = Some(run.clone());
                run
            }
            None => match self.last.borrow().clone() {
                Some(run) => run,
                None => bail!("scripted agent has no responses"),
            },
        };
        let signal_seen = run.signal_past_limit || contains_signal(&run.output);
        Ok(AgentRun {
            output: run.output,
            output_truncated: run.output_truncated,
            stderr: Vec::new(),
            exit_code: run.exit_code,
            timed_out: run.timed_out,
            signal_seen,
        })
    }
}

/// A throwaway install root.
pub struct TestInstall {
    temp: TempDir,
}

impl TestInstall {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir().context("create tempdir")?,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Write `contents` at `relative`, creating parent directories.
    pub fn write_file(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write a requirements file with one item per entry in `passes`.
    pub fn write_prd(
        &self,
        relative: &str,
        branch_name: Option<&str>,
        passes: &[bool],
    ) -> Result<PathBuf> {
        let stories: Vec<_> = passes
            .iter()
            .enumerate()
            .map(|(idx, passes)| {
                json!({
                    "id": format!("US-{:03}", idx + 1),
                    "title": format!("story {}", idx + 1),
                    "passes": passes,
                })
            })
            .collect();
        let mut doc = json!({ "userStories": stories });
        if let Some(branch) = branch_name {
            doc["branchName"] = json!(branch);
        }
        self.write_file(relative, &serde_json::to_string_pretty(&doc)?)
    }

    /// Create `.worktree/<name>` and return its path.
    pub fn create_worktree(&self, name: &str) -> Result<PathBuf> {
        let path = self.root().join(WORKTREE_DIR).join(name);
        fs::create_dir_all(&path).with_context(|| format!("create {}", path.display()))?;
        Ok(path)
    }

    /// Write `.ralph/config.toml`.
    pub fn write_config(&self, config: &RalphConfig) -> Result<PathBuf> {
        let contents = toml::to_string_pretty(config).context("serialize config")?;
        self.write_file(CONFIG_RELATIVE_PATH, &contents)
    }
}

/// Configuration for `mode` with every input rooted at `workspace`, no delay,
/// and a three-iteration cap.
pub fn run_configuration(mode: RunMode, workspace: &Path) -> RunConfiguration {
    RunConfiguration {
        mode,
        install_root: workspace.to_path_buf(),
        workspace: WorkspaceLocation {
            path: workspace.to_path_buf(),
            source: WorkspaceSource::CurrentDir,
        },
        issue: Some("bd-42".to_string()),
        plan_path: Some(workspace.join("PLAN.md")),
        prd_path: Some(workspace.join("prd.json")),
        custom_instructions: None,
        settings_path: None,
        ledger_path: workspace.join("progress.txt"),
        max_iterations: 3,
        iteration_delay: Duration::ZERO,
        agent_timeout: None,
        output_limit_bytes: 1024 * 1024,
        agent_command: vec!["claude".to_string()],
        debug: false,
    }
}
