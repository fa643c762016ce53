//! Loop-level harness tests: startup resolution plus `run_loop` over a scripted agent.
//!
//! These cover the end-to-end contract of a run: how many times the agent is
//! called, how the run stops, and what the progress ledger looks like afterwards.

use std::fs;
use std::path::PathBuf;

use ralph::controller::{LoopStop, run_loop};
use ralph::core::completion::COMPLETION_SIGNAL;
use ralph::core::mode::RunMode;
use ralph::io::config::RalphConfig;
use ralph::io::ledger::ITERATION_HEADING;
use ralph::run_config::{RunArgs, resolve_run};
use ralph::test_support::{ScriptedAgent, ScriptedRun, TestInstall};

fn install_without_delay() -> TestInstall {
    let install = TestInstall::new().expect("install");
    install
        .write_config(&RalphConfig {
            iteration_delay_ms: 0,
            ..RalphConfig::default()
        })
        .expect("config");
    install
}

fn plan_args(cap: u32) -> RunArgs {
    RunArgs {
        max_iterations: Some(cap),
        plan: Some(PathBuf::from("PLAN.md")),
        ..RunArgs::default()
    }
}

/// Cap of 3, agent never signals: three calls, exhausted, and the ledger
/// holds three iteration blocks followed by one terminal block.
#[test]
fn never_signalling_agent_exhausts_the_cap() {
    let install = install_without_delay();
    install
        .write_file("PLAN.md", "- [ ] one\n- [ ] two\n")
        .expect("plan");
    let config = resolve_run(&plan_args(3), install.root()).expect("resolve");
    assert_eq!(config.mode, RunMode::Plan);

    let agent = ScriptedAgent::never_completes();
    let mut ordinals = Vec::new();
    let outcome = run_loop(&config, &agent, |record| ordinals.push(record.ordinal)).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Exhausted);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(agent.calls(), 3);
    assert_eq!(ordinals, vec![1, 2, 3]);

    let ledger = fs::read_to_string(install.root().join("progress.txt")).expect("ledger");
    assert!(ledger.starts_with("# Ralph Progress Log\n"));
    assert_eq!(ledger.matches(ITERATION_HEADING).count(), 3);
    assert_eq!(ledger.matches("## MAX ITERATIONS REACHED - ").count(), 1);
    assert!(!ledger.contains("## COMPLETED"));
    let terminal = ledger.rfind("## MAX ITERATIONS REACHED").expect("terminal");
    let last_iteration = ledger.rfind("## Iteration 3").expect("iteration 3");
    assert!(last_iteration < terminal);
}

/// Cap of 5, signal on the second call: the run stops there and the agent
/// is never called a third time.
#[test]
fn signal_on_second_call_stops_the_run() {
    let install = install_without_delay();
    install.write_file("PLAN.md", "- [ ] one\n").expect("plan");
    let config = resolve_run(&plan_args(5), install.root()).expect("resolve");

    let agent = ScriptedAgent::new(vec![
        ScriptedRun::ok("did step one\n"),
        ScriptedRun::ok(format!("all done {COMPLETION_SIGNAL}\n")),
        ScriptedRun::ok("must never run\n"),
    ]);
    let outcome = run_loop(&config, &agent, |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(agent.calls(), 2);

    let ledger = fs::read_to_string(install.root().join("progress.txt")).expect("ledger");
    assert_eq!(ledger.matches(ITERATION_HEADING).count(), 2);
    assert_eq!(ledger.matches("## COMPLETED - ").count(), 1);
    assert!(ledger.contains("Completion signal: yes"));
}

#[test]
fn near_miss_signal_does_not_complete() {
    let install = install_without_delay();
    install.write_file("PLAN.md", "- [ ] one\n").expect("plan");
    let config = resolve_run(&plan_args(2), install.root()).expect("resolve");

    let agent = ScriptedAgent::new(vec![ScriptedRun::ok(
        "<promise>complete</promise> <promise> COMPLETE</promise>",
    )]);
    let outcome = run_loop(&config, &agent, |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Exhausted);
    assert_eq!(agent.calls(), 2);
}

/// A requirements file naming an existing worktree moves the whole run there.
#[test]
fn branch_worktree_hosts_agent_and_ledger() {
    let install = install_without_delay();
    install
        .write_prd("prd.json", Some("feature/x"), &[true, false])
        .expect("prd");
    let worktree = install.create_worktree("feature/x").expect("worktree");

    let args = RunArgs {
        max_iterations: Some(2),
        ..RunArgs::default()
    };
    let config = resolve_run(&args, install.root()).expect("resolve");
    assert_eq!(config.mode, RunMode::Prd);

    let agent = ScriptedAgent::new(vec![ScriptedRun::ok(COMPLETION_SIGNAL)]);
    run_loop(&config, &agent, |_| {}).expect("loop");

    assert_eq!(agent.workdirs(), vec![worktree.clone()]);
    assert!(worktree.join("progress.txt").is_file());
    assert!(!install.root().join("progress.txt").exists());
    let prompt = String::from_utf8(agent.prompts()[0].clone()).expect("utf8");
    assert!(prompt.contains(&install.root().join("prd.json").display().to_string()));
}

/// Tracker modes never touch the ledger.
#[test]
fn beads_parent_run_leaves_no_ledger() {
    let install = install_without_delay();
    let args = RunArgs {
        max_iterations: Some(2),
        issue: Some("bd-42".to_string()),
        ..RunArgs::default()
    };
    let config = resolve_run(&args, install.root()).expect("resolve");
    assert_eq!(config.mode, RunMode::BeadsParent);

    let agent = ScriptedAgent::never_completes();
    let outcome = run_loop(&config, &agent, |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::Exhausted);
    assert!(!install.root().join("progress.txt").exists());
    let prompt = String::from_utf8(agent.prompts()[0].clone()).expect("utf8");
    assert!(prompt.contains("bd-42"));
}

#[test]
fn custom_prompt_is_sent_verbatim_every_iteration() {
    let install = install_without_delay();
    install.write_file("PLAN.md", "- [ ] one\n").expect("plan");
    install
        .write_file("PROMPT.md", "Fix the build.\\nThen stop.\n")
        .expect("prompt");
    let args = RunArgs {
        prompt: Some(PathBuf::from("PROMPT.md")),
        ..plan_args(2)
    };
    let config = resolve_run(&args, install.root()).expect("resolve");

    let agent = ScriptedAgent::never_completes();
    run_loop(&config, &agent, |_| {}).expect("loop");

    let expected = b"Fix the build.\\nThen stop.\n".to_vec();
    assert_eq!(agent.prompts(), vec![expected.clone(), expected]);
}
