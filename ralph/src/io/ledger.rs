//! Append-only progress ledger (`progress.txt`) for plan and requirements runs.
//!
//! Layout: one header block written when the file is created, one block per
//! iteration, then one terminal block per run. Existing content is never
//! rewritten. The file is opened per write, so `tail -f` is safe.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::core::types::IterationRecord;

/// Heading prefix of every iteration block.
pub const ITERATION_HEADING: &str = "## Iteration ";

/// How a run ended, as recorded in its terminal block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTerminal {
    Completed,
    MaxIterationsReached,
}

impl LedgerTerminal {
    pub fn heading(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::MaxIterationsReached => "MAX ITERATIONS REACHED",
        }
    }
}

/// Handle to the ledger file. Holds no open descriptor.
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: PathBuf,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the header if the file does not exist yet. Returns whether it was written.
    pub fn ensure_header(&self, started_at: DateTime<Utc>, branch: &str) -> Result<bool> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "ledger exists, keeping header");
                return Ok(false);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create {}", self.path.display()));
            }
        };
        let header = format!(
            "# Ralph Progress Log\nStarted: {}\nBranch: {branch}\n---\n",
            timestamp(started_at)
        );
        file.write_all(header.as_bytes())
            .with_context(|| format!("write {}", self.path.display()))?;
        debug!(path = %self.path.display(), "ledger created");
        Ok(true)
    }

    /// Append the block for a finished iteration.
    pub fn append_iteration(&self, record: &IterationRecord) -> Result<()> {
        let mut block = format!(
            "\n{ITERATION_HEADING}{} - {}\nAgent exit: {}\nCompletion signal: {}\nDuration: {}ms\nOutput bytes: {}\n",
            record.ordinal,
            timestamp(record.finished_at),
            record.exit_label(),
            if record.signal_observed { "yes" } else { "no" },
            record.duration_ms(),
            record.output.len(),
        );
        if record.output_truncated > 0 {
            block.push_str(&format!(
                "Output truncated: {} bytes\n",
                record.output_truncated
            ));
        }
        block.push_str("---\n");
        self.append(&block)
    }

    /// Append the single terminal block of a run.
    pub fn append_terminal(
        &self,
        terminal: LedgerTerminal,
        at: DateTime<Utc>,
        iterations: u32,
    ) -> Result<()> {
        let block = format!(
            "\n## {} - {}\nIterations: {iterations}\n---\n",
            terminal.heading(),
            timestamp(at)
        );
        self.append(&block)
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("open {} for append", self.path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
