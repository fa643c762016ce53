//! Loop configuration stored under `.ralph/config.toml` in the install root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Relative location of the config file inside the install root.
pub const CONFIG_RELATIVE_PATH: &str = ".ralph/config.toml";

/// Loop configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    /// Iteration cap used when none is given on the command line.
    pub max_iterations: u32,

    /// Pause between iterations, in milliseconds.
    pub iteration_delay_ms: u64,

    /// Kill an agent that runs longer than this. `0` waits indefinitely.
    pub agent_timeout_secs: u64,

    /// Upper bound on captured agent stdout/stderr, in bytes.
    pub output_limit_bytes: usize,

    /// Requirements file looked up in the install root when `--prd` is absent.
    pub default_prd: String,

    /// Progress ledger file name, created inside the workspace.
    pub ledger_file: String,

    /// Agent settings file used when `--settings` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<PathBuf>,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent program and leading arguments (e.g. `["claude"]`).
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string()],
        }
    }
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_delay_ms: 2_000,
            agent_timeout_secs: 0,
            output_limit_bytes: 32 * 1024 * 1024,
            default_prd: "prd.json".to_string(),
            ledger_file: "progress.txt".to_string(),
            settings: None,
            agent: AgentConfig::default(),
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.default_prd.trim().is_empty() {
            return Err(anyhow!("default_prd must not be empty"));
        }
        if self.ledger_file.trim().is_empty() || self.ledger_file.contains('/') {
            return Err(anyhow!("ledger_file must be a plain file name"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        let cfg = RalphConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RalphConfig::default());
    }

    #[test]
    fn serialized_config_loads_back_with_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_RELATIVE_PATH);
        let cfg = RalphConfig {
            iteration_delay_ms: 0,
            settings: Some(PathBuf::from("ralph-settings.json")),
            agent: AgentConfig {
                command: vec!["/bin/sh".to_string(), "agent.sh".to_string()],
            },
            ..RalphConfig::default()
        };
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, toml::to_string_pretty(&cfg).expect("serialize")).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "iteration_delay_ms = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.iteration_delay_ms, 5);
        assert_eq!(cfg.max_iterations, 10);
        assert_eq!(cfg.agent.command, vec!["claude".to_string()]);
    }

    #[test]
    fn rejects_zero_iterations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations must be > 0"));
    }

    #[test]
    fn rejects_empty_agent_command() {
        let cfg = RalphConfig {
            agent: AgentConfig {
                command: Vec::new(),
            },
            ..RalphConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
