//! Side-effecting operations: filesystem, git, and the agent process.

pub mod agent;
pub mod config;
pub mod events;
pub mod git;
pub mod iteration_log;
pub mod ledger;
pub mod process;
pub mod prompt;
pub mod requirements;
pub mod workspace;
