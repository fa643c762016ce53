//! Run mode selection from the task sources given on the command line.

use std::fmt;

/// The single task source driving a run.
///
/// Exactly one mode is active for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No explicit task source: work any ready tracker task.
    BeadsAuto,
    /// Work the descendants of one tracker issue.
    BeadsParent,
    /// Step through a plan file.
    Plan,
    /// Step through the items of a requirements file.
    Prd,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeadsAuto => "beads-auto",
            Self::BeadsParent => "beads-parent",
            Self::Plan => "plan",
            Self::Prd => "prd",
        }
    }

    /// Whether progress is tracked in the local ledger rather than the tracker.
    pub fn uses_ledger(&self) -> bool {
        matches!(self, Self::Plan | Self::Prd)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which task sources were provided, by presence only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSources {
    pub issue: bool,
    pub prd: bool,
    pub plan: bool,
}

/// Pick the run mode. Priority: issue > requirements file > plan file > auto.
///
/// An explicit issue wins over a requirements file that merely exists at its
/// default location.
pub fn resolve_mode(sources: TaskSources) -> RunMode {
    if sources.issue {
        RunMode::BeadsParent
    } else if sources.prd {
        RunMode::Prd
    } else if sources.plan {
        RunMode::Plan
    } else {
        RunMode::BeadsAuto
    }
}
