//! Agent abstraction for the per-iteration invocation.
//!
//! The [`Agent`] trait decouples the loop from the actual agent backend
//! (the `claude` CLI by default). Tests use scripted agents that return
//! predetermined output without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::completion::COMPLETION_SIGNAL;
use crate::error::AgentUnavailable;
use crate::io::process::{CollectOptions, Tee, collect_output, spawn_piped};

/// Edit-permission mode passed on every invocation: accept all edits, never prompt.
pub const PERMISSION_MODE: &str = "acceptEdits";

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt bytes, written verbatim to the agent's stdin.
    pub prompt: Vec<u8>,
    /// Optional settings file governing finer-grained permissions.
    pub settings: Option<PathBuf>,
    /// Ask for one JSON event per line instead of plain text.
    pub stream_events: bool,
    /// Where stdout lines are mirrored while the agent runs.
    pub tee: Tee,
    /// `None` waits for the agent indefinitely.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

/// What came back from one invocation. A non-zero exit is still a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    /// Captured stdout, at most `output_limit_bytes` long.
    pub output: Vec<u8>,
    /// Stdout bytes dropped past the limit.
    pub output_truncated: usize,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// The completion signal appeared anywhere on stdout, including dropped bytes.
    pub signal_seen: bool,
}

impl AgentRun {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Run the agent once.
    ///
    /// Errors only when the agent could not be run at all; a failing agent
    /// returns `Ok` with its exit code.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun>;
}

/// Agent that spawns a Claude-compatible CLI.
#[derive(Debug, Clone)]
pub struct ClaudeAgent {
    command: Vec<String>,
}

impl ClaudeAgent {
    /// `command` is the program followed by any leading arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn build_command(&self, request: &AgentRequest) -> Result<Command> {
        let (program, leading) = self
            .command
            .split_first()
            .context("agent command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg("-p")
            .arg("--permission-mode")
            .arg(PERMISSION_MODE);
        if let Some(settings) = &request.settings {
            cmd.arg("--settings").arg(settings);
        }
        if request.stream_events {
            cmd.arg("--output-format").arg("stream-json").arg("--verbose");
        }
        cmd.current_dir(&request.workdir);
        Ok(cmd)
    }
}

impl Agent for ClaudeAgent {
    #[instrument(skip_all, fields(streaming = request.stream_events))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let cmd = self.build_command(request)?;
        let child = spawn_piped(cmd, true).map_err(|err| AgentUnavailable {
            program: self.command[0].clone(),
            reason: err.to_string(),
        })?;

        let output = collect_output(
            child,
            &CollectOptions {
                stdin: Some(&request.prompt),
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
                tee: &request.tee,
                watch: Some(COMPLETION_SIGNAL.as_bytes()),
            },
        )
        .context("run agent")?;

        if output.timed_out {
            warn!(timeout = ?request.timeout, "agent timed out");
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited with failure");
        } else {
            debug!("agent completed");
        }

        Ok(AgentRun {
            output: output.stdout,
            output_truncated: output.stdout_truncated,
            stderr: output.stderr,
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            signal_seen: output.watch_seen,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(workdir: &std::path::Path, stream_events: bool) -> AgentRequest {
        AgentRequest {
            workdir: workdir.to_path_buf(),
            prompt: b"do the thing".to_vec(),
            settings: Some(PathBuf::from("ralph-settings.json")),
            stream_events,
            tee: Tee::None,
            timeout: None,
            output_limit_bytes: 1024,
        }
    }

    /// Agent stub that prints its argv, then echoes stdin.
    fn echo_agent() -> ClaudeAgent {
        ClaudeAgent::new(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            r#"echo "$@"; cat; exit 4"#.to_string(),
            "agent".to_string(),
        ])
    }

    #[test]
    fn passes_flags_and_prompt_and_keeps_failing_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = echo_agent()
            .invoke(&request(temp.path(), false))
            .expect("invoke");
        let text = String::from_utf8(run.output.clone()).expect("utf8");
        assert_eq!(
            text,
            "-p --permission-mode acceptEdits --settings ralph-settings.json\ndo the thing"
        );
        assert_eq!(run.exit_code, Some(4));
        assert!(!run.signal_seen);
        assert!(!run.succeeded());
    }

    #[test]
    fn stream_mode_requests_json_events() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = echo_agent()
            .invoke(&request(temp.path(), true))
            .expect("invoke");
        let text = String::from_utf8(run.output).expect("utf8");
        assert!(text.starts_with(
            "-p --permission-mode acceptEdits --settings ralph-settings.json --output-format stream-json --verbose\n"
        ));
    }

    fn sh_agent(script: &str) -> ClaudeAgent {
        ClaudeAgent::new(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "agent".to_string(),
        ])
    }

    #[test]
    fn signal_after_output_limit_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = sh_agent(&format!(
            "cat >/dev/null; printf '%0200d\\n' 0; echo '{COMPLETION_SIGNAL}'"
        ));
        let mut req = request(temp.path(), false);
        req.output_limit_bytes = 64;
        let run = agent.invoke(&req).expect("invoke");
        assert_eq!(run.output.len(), 64);
        assert!(run.output_truncated > 0);
        assert!(run.signal_seen);
    }

    #[test]
    fn wrapper_agent_is_killed_at_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = sh_agent("cat >/dev/null; sleep 8; echo done");
        let mut req = request(temp.path(), false);
        req.timeout = Some(Duration::from_secs(1));
        let started = std::time::Instant::now();
        let run = agent.invoke(&req).expect("invoke");
        assert!(run.timed_out);
        assert_eq!(run.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_binary_is_agent_unavailable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ClaudeAgent::new(vec!["/nonexistent/claude".to_string()]);
        let err = agent.invoke(&request(temp.path(), false)).unwrap_err();
        let unavailable = err
            .downcast_ref::<AgentUnavailable>()
            .expect("agent unavailable");
        assert_eq!(unavailable.program, "/nonexistent/claude");
    }
}
