//! Startup resolution: command-line inputs and config file into one immutable
//! [`RunConfiguration`].
//!
//! Everything that can be wrong with a run's inputs is detected here, before
//! the first agent invocation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::core::mode::{RunMode, TaskSources, resolve_mode};
use crate::error::ConfigError;
use crate::io::config::{CONFIG_RELATIVE_PATH, RalphConfig, load_config};
use crate::io::requirements::{Requirements, ensure_has_items, load_requirements};
use crate::io::workspace::{WorkspaceLocation, WorkspaceRequest, resolve_workspace};

/// Raw inputs, as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub max_iterations: Option<u32>,
    pub issue: Option<String>,
    pub prd: Option<PathBuf>,
    pub plan: Option<PathBuf>,
    pub prompt: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub worktree: Option<String>,
    pub root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub debug: bool,
}

/// Instructions file that replaces the built-in prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomInstructions {
    pub path: PathBuf,
    /// Raw file bytes; never re-encoded.
    pub content: Vec<u8>,
}

/// Resolved, validated inputs for one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    pub mode: RunMode,
    pub install_root: PathBuf,
    pub workspace: WorkspaceLocation,
    pub issue: Option<String>,
    pub plan_path: Option<PathBuf>,
    pub prd_path: Option<PathBuf>,
    pub custom_instructions: Option<CustomInstructions>,
    pub settings_path: Option<PathBuf>,
    pub ledger_path: PathBuf,
    pub max_iterations: u32,
    pub iteration_delay: Duration,
    /// `None` waits for the agent indefinitely.
    pub agent_timeout: Option<Duration>,
    pub output_limit_bytes: usize,
    pub agent_command: Vec<String>,
    pub debug: bool,
}

/// Resolve `args` relative to `caller_dir` (the directory ralph was started in).
pub fn resolve_run(args: &RunArgs, caller_dir: &Path) -> Result<RunConfiguration> {
    let install_root = match &args.root {
        Some(root) => {
            let root = absolutize(caller_dir, root);
            root.canonicalize().map_err(|err| {
                config_error(format!("cannot resolve install root {}: {err}", root.display()))
            })?
        }
        None => caller_dir.to_path_buf(),
    };
    if !install_root.is_dir() {
        return Err(config_error(format!(
            "install root is not a directory: {}",
            install_root.display()
        )));
    }

    let config_path = match &args.config {
        Some(path) => require_file(caller_dir, path, "config file")?,
        None => install_root.join(CONFIG_RELATIVE_PATH),
    };
    let cfg = load_config(&config_path).map_err(|err| config_error(format!("{err:#}")))?;

    let max_iterations = args.max_iterations.unwrap_or(cfg.max_iterations);
    if max_iterations == 0 {
        return Err(config_error(
            "iteration count must be a positive integer".to_string(),
        ));
    }

    let issue = args
        .issue
        .as_deref()
        .map(str::trim)
        .filter(|issue| !issue.is_empty())
        .map(str::to_string);
    let prd_path = match &args.prd {
        Some(path) => Some(require_file(caller_dir, path, "requirements file")?),
        None => default_prd(&install_root, &cfg),
    };
    let plan_path = match &args.plan {
        Some(path) => Some(require_file(caller_dir, path, "plan file")?),
        None => None,
    };

    let mode = resolve_mode(TaskSources {
        issue: issue.is_some(),
        prd: prd_path.is_some(),
        plan: plan_path.is_some(),
    });
    info!(%mode, "resolved run mode");

    let requirements = match &prd_path {
        Some(path) => Some(read_requirements(path, mode)?),
        None => None,
    };

    let workspace = resolve_workspace(&WorkspaceRequest {
        install_root: &install_root,
        caller_dir,
        worktree: args.worktree.as_deref(),
        branch_name: requirements
            .as_ref()
            .and_then(|req| req.branch_name.as_deref()),
    })?;

    let custom_instructions = match &args.prompt {
        Some(path) => {
            let path = require_file(caller_dir, path, "prompt file")?;
            let content = fs::read(&path).map_err(|err| {
                config_error(format!("cannot read prompt file {}: {err}", path.display()))
            })?;
            Some(CustomInstructions { path, content })
        }
        None => None,
    };

    let settings_path = match (&args.settings, &cfg.settings) {
        (Some(path), _) => Some(require_file(caller_dir, path, "settings file")?),
        (None, Some(path)) => Some(require_file(&install_root, path, "settings file")?),
        (None, None) => None,
    };

    let ledger_path = workspace.path.join(&cfg.ledger_file);
    let config = RunConfiguration {
        // Only the modes that use the ledger keep a task-source path the prompt points at.
        plan_path: plan_path.filter(|_| mode == RunMode::Plan),
        prd_path: prd_path.filter(|_| mode == RunMode::Prd),
        mode,
        install_root,
        workspace,
        issue: issue.filter(|_| mode == RunMode::BeadsParent),
        custom_instructions,
        settings_path,
        ledger_path,
        max_iterations,
        iteration_delay: Duration::from_millis(cfg.iteration_delay_ms),
        agent_timeout: (cfg.agent_timeout_secs > 0)
            .then(|| Duration::from_secs(cfg.agent_timeout_secs)),
        output_limit_bytes: cfg.output_limit_bytes,
        agent_command: cfg.agent.command.clone(),
        debug: args.debug,
    };
    debug!(?config, "run configuration");
    Ok(config)
}

fn config_error(message: String) -> anyhow::Error {
    ConfigError::new(message).into()
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn require_file(base: &Path, path: &Path, what: &str) -> Result<PathBuf> {
    let resolved = absolutize(base, path);
    if !resolved.is_file() {
        return Err(config_error(format!(
            "{what} not found: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

fn default_prd(install_root: &Path, cfg: &RalphConfig) -> Option<PathBuf> {
    let path = install_root.join(&cfg.default_prd);
    path.is_file().then_some(path)
}

/// A requirements file that exists but does not parse is fatal in every mode.
fn read_requirements(path: &Path, mode: RunMode) -> Result<Requirements> {
    let requirements =
        load_requirements(path).map_err(|err| config_error(format!("{err:#}")))?;
    if mode == RunMode::Prd {
        ensure_has_items(&requirements, path).map_err(|err| config_error(format!("{err:#}")))?;
        info!(
            passing = requirements.passing_items,
            total = requirements.total_items,
            complete = requirements.is_complete(),
            "requirements progress"
        );
    }
    Ok(requirements)
}
