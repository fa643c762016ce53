//! Shared types for the iteration loop.

use chrono::{DateTime, Utc};

/// One pass of the loop, finalized once the agent invocation returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    /// 1-based, monotonically increasing, never reused within a run.
    pub ordinal: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Prompt sent to the agent. Only persisted by debug capture.
    pub prompt: Vec<u8>,
    /// Agent stdout, up to the configured output limit.
    pub output: Vec<u8>,
    /// Stdout bytes dropped past the output limit. Still scanned for the signal.
    pub output_truncated: usize,
    /// Process exit code; `None` when killed by a signal or timeout.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub signal_observed: bool,
}

impl IterationRecord {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Human-readable exit status for logs and the ledger.
    pub fn exit_label(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        match self.exit_code {
            Some(code) => code.to_string(),
            None => "killed".to_string(),
        }
    }
}
