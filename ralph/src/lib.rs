//! Iteration controller for an autonomous coding-agent loop.
//!
//! Each iteration hands a freshly built prompt to a non-interactive agent CLI,
//! captures what it prints, and stops as soon as the output contains the
//! completion signal or the iteration cap is reached. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (mode resolution, path component
//!   checks, the completion scan). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution).
//!   Isolated behind [`io::agent::Agent`] so tests can script the agent.
//!
//! Orchestration modules ([`run_config`], [`controller`]) turn command-line
//! inputs into a [`run_config::RunConfiguration`] and drive the loop.

pub mod controller;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run_config;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
