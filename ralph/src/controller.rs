//! The iteration loop: prompt, invoke, record, scan, repeat.

use std::thread;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::completion::contains_signal;
use crate::core::types::IterationRecord;
use crate::io::agent::{Agent, AgentRequest};
use crate::io::events::{DecodedStream, decode_stream};
use crate::io::git::Git;
use crate::io::iteration_log::{
    IterationMeta, IterationPaths, IterationWriteRequest, claim_run_id, write_iteration,
};
use crate::io::ledger::{LedgerTerminal, ProgressLedger};
use crate::io::process::Tee;
use crate::io::prompt::{IterationContext, PromptBuilder};
use crate::run_config::RunConfiguration;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The agent emitted the completion signal.
    Completed,
    /// The iteration cap was reached without the signal.
    Exhausted,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    pub iterations: u32,
    pub stop: LoopStop,
}

/// Run identifier derived from the start time, e.g. `20261018T093000.250Z`.
pub fn run_id_for(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// Invoke the agent until it signals completion or `max_iterations` is reached.
///
/// A failing or timed-out agent only costs an iteration. Errors are reserved for
/// an agent that cannot be started and for failures writing the ledger or
/// debug capture.
#[instrument(skip_all, fields(mode = %config.mode, max_iterations = config.max_iterations))]
pub fn run_loop<A: Agent, F: FnMut(&IterationRecord)>(
    config: &RunConfiguration,
    agent: &A,
    mut on_iteration: F,
) -> Result<RunOutcome> {
    let started_at = Utc::now();
    let workdir = &config.workspace.path;
    let run_id = if config.debug {
        claim_run_id(workdir, &run_id_for(started_at))?
    } else {
        run_id_for(started_at)
    };

    let ledger = config
        .mode
        .uses_ledger()
        .then(|| ProgressLedger::new(&config.ledger_path));
    if let Some(ledger) = &ledger {
        let branch = Git::new(workdir).branch_label();
        if ledger.ensure_header(started_at, &branch)? {
            info!(path = %ledger.path().display(), %branch, "started progress ledger");
        }
    }

    let builder = PromptBuilder::new();
    info!(%run_id, workspace = %workdir.display(), "starting loop");

    for n in 1..=config.max_iterations {
        let prompt = builder.build(
            config,
            &IterationContext {
                iteration: n,
                max_iterations: config.max_iterations,
            },
        )?;

        let capture = config
            .debug
            .then(|| IterationPaths::new(workdir, &run_id, n));
        let request = AgentRequest {
            workdir: workdir.clone(),
            prompt: prompt.into_bytes(),
            settings: config.settings_path.clone(),
            stream_events: config.debug,
            tee: match &capture {
                Some(paths) => Tee::File(paths.events_path.clone()),
                None => Tee::Stdout,
            },
            timeout: config.agent_timeout,
            output_limit_bytes: config.output_limit_bytes,
        };

        info!(iteration = n, "invoking agent");
        let iteration_started = Utc::now();
        let run = agent
            .invoke(&request)
            .with_context(|| format!("iteration {n}"))?;
        let finished_at = Utc::now();

        if !run.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&run.stderr), "agent stderr");
        }
        if !run.succeeded() {
            warn!(
                iteration = n,
                exit_code = ?run.exit_code,
                timed_out = run.timed_out,
                "agent did not exit cleanly"
            );
        }

        let decoded = config.debug.then(|| decode_stream(&run.output));
        let signal_observed = run.signal_seen || signal_in(&run.output, decoded.as_ref());
        let record = IterationRecord {
            ordinal: n,
            started_at: iteration_started,
            finished_at,
            prompt: request.prompt,
            output: run.output,
            output_truncated: run.output_truncated,
            exit_code: run.exit_code,
            timed_out: run.timed_out,
            signal_observed,
        };

        if let Some(ledger) = &ledger {
            ledger.append_iteration(&record)?;
        }
        if let (Some(paths), Some(decoded)) = (&capture, &decoded) {
            let meta =
                IterationMeta::from_record(&run_id, config.mode, &record, decoded.malformed_lines);
            write_iteration(&IterationWriteRequest {
                paths,
                meta: &meta,
                prompt: &record.prompt,
                transcript: &decoded.render(),
            })?;
        }
        on_iteration(&record);

        if signal_observed {
            info!(iteration = n, "completion signal observed");
            return finish(ledger.as_ref(), run_id, n, LoopStop::Completed);
        }
        if n < config.max_iterations && !config.iteration_delay.is_zero() {
            thread::sleep(config.iteration_delay);
        }
    }

    warn!(
        max_iterations = config.max_iterations,
        "iteration cap reached without completion"
    );
    finish(
        ledger.as_ref(),
        run_id,
        config.max_iterations,
        LoopStop::Exhausted,
    )
}

fn signal_in(output: &[u8], decoded: Option<&DecodedStream>) -> bool {
    contains_signal(output)
        || decoded.is_some_and(|stream| contains_signal(stream.assistant_text().as_bytes()))
}

fn finish(
    ledger: Option<&ProgressLedger>,
    run_id: String,
    iterations: u32,
    stop: LoopStop,
) -> Result<RunOutcome> {
    if let Some(ledger) = ledger {
        let terminal = match stop {
            LoopStop::Completed => LedgerTerminal::Completed,
            LoopStop::Exhausted => LedgerTerminal::MaxIterationsReached,
        };
        ledger.append_terminal(terminal, Utc::now(), iterations)?;
    }
    Ok(RunOutcome {
        run_id,
        iterations,
        stop,
    })
}
