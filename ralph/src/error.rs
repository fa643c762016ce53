//! Error markers carried inside `anyhow::Error` and recovered by the binary
//! with `downcast_ref` to pick an exit code.

use std::fmt;

/// Invalid or missing run input, detected before the loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ConfigError {}

/// The agent process could not be started at all (e.g. binary not on `PATH`).
///
/// Unlike a non-zero agent exit, this ends the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentUnavailable {
    pub program: String,
    pub reason: String,
}

impl fmt::Display for AgentUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot start agent {:?}: {}", self.program, self.reason)
    }
}

impl std::error::Error for AgentUnavailable {}
