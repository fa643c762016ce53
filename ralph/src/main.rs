use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use ralph::controller::{LoopStop, RunOutcome, run_loop};
use ralph::core::types::IterationRecord;
use ralph::exit_codes;
use ralph::io::agent::ClaudeAgent;
use ralph::io::workspace::enter_workspace;
use ralph::logging;
use ralph::run_config::{RunArgs, resolve_run};

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Run a coding agent in a loop until it signals completion"
)]
struct Cli {
    /// Maximum number of iterations (defaults to the config file, else 10).
    max_iterations: Option<u32>,
    /// Work through the descendants of this tracker issue.
    #[arg(long, value_name = "ID")]
    issue: Option<String>,
    /// Requirements file (defaults to `prd.json` in the install root when present).
    #[arg(long, value_name = "FILE")]
    prd: Option<PathBuf>,
    /// Markdown plan to work through step by step.
    #[arg(long, value_name = "FILE")]
    plan: Option<PathBuf>,
    /// Instructions file sent verbatim instead of the built-in prompt.
    #[arg(long, value_name = "FILE")]
    prompt: Option<PathBuf>,
    /// Permission settings file passed through to the agent.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
    /// Run inside `<root>/.worktree/<NAME>`.
    #[arg(long, value_name = "NAME")]
    worktree: Option<String>,
    /// Install root holding `.worktree/`, `.ralph/` and the default requirements file.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
    /// Config file (defaults to `<root>/.ralph/config.toml`).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Capture structured agent events and per-iteration artifacts under `.ralph/iterations/`.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn into_args(self) -> RunArgs {
        RunArgs {
            max_iterations: self.max_iterations,
            issue: self.issue,
            prd: self.prd,
            plan: self.plan,
            prompt: self.prompt,
            settings: self.settings,
            worktree: self.worktree,
            root: self.root,
            config: self.config,
            debug: self.debug,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let code = match run(cli.into_args()) {
        Ok(outcome) => {
            eprintln!("{}", summary_line(&outcome));
            match outcome.stop {
                LoopStop::Completed => exit_codes::COMPLETE,
                LoopStop::Exhausted => exit_codes::EXHAUSTED,
            }
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "run failed");
            eprintln!("ralph: {err:#}");
            exit_codes::CONFIG
        }
    };
    std::process::exit(code);
}

fn run(args: RunArgs) -> Result<RunOutcome> {
    let caller_dir = std::env::current_dir().context("read current directory")?;
    let config = resolve_run(&args, &caller_dir)?;
    enter_workspace(&config.workspace)?;
    eprintln!(
        "ralph: {} mode in {} (at most {} iterations)",
        config.mode,
        config.workspace.path.display(),
        config.max_iterations
    );

    let agent = ClaudeAgent::new(config.agent_command.clone());
    let max_iterations = config.max_iterations;
    run_loop(&config, &agent, |record| {
        eprintln!("{}", iteration_line(record, max_iterations));
    })
}

fn iteration_line(record: &IterationRecord, max_iterations: u32) -> String {
    format!(
        "ralph: iteration {}/{} finished (exit {}, {}ms){}",
        record.ordinal,
        max_iterations,
        record.exit_label(),
        record.duration_ms(),
        if record.signal_observed {
            ", completion signal received"
        } else {
            ""
        }
    )
}

fn summary_line(outcome: &RunOutcome) -> String {
    match outcome.stop {
        LoopStop::Completed => format!(
            "ralph: completed after {} iteration(s)",
            outcome.iterations
        ),
        LoopStop::Exhausted => format!(
            "ralph: reached the limit of {} iteration(s) without completion",
            outcome.iterations
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_positional_cap_and_flags() {
        let cli = Cli::parse_from(["ralph", "5", "--plan", "PLAN.md", "--debug"]);
        assert_eq!(cli.max_iterations, Some(5));
        assert_eq!(cli.plan, Some(PathBuf::from("PLAN.md")));
        assert!(cli.debug);
    }

    #[test]
    fn parse_defaults() {
        let args = Cli::parse_from(["ralph"]).into_args();
        assert_eq!(args, RunArgs::default());
    }

    #[test]
    fn negative_cap_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["ralph", "-3"]).is_err());
        assert!(Cli::try_parse_from(["ralph", "many"]).is_err());
    }

    #[test]
    fn summary_names_terminal_state() {
        let outcome = RunOutcome {
            run_id: "20261018T093000Z".to_string(),
            iterations: 3,
            stop: LoopStop::Exhausted,
        };
        assert_eq!(
            summary_line(&outcome),
            "ralph: reached the limit of 3 iteration(s) without completion"
        );
    }
}
