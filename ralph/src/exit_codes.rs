//! Stable process exit codes for `ralph`.

/// The agent emitted the completion signal.
pub const COMPLETE: i32 = 0;
/// The iteration cap was reached without the completion signal.
pub const EXHAUSTED: i32 = 1;
/// Invalid configuration or inputs, a rejected path, or an agent that could not be started.
pub const CONFIG: i32 = 2;
