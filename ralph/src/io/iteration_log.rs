//! Debug capture under `.ralph/iterations/<run-id>/<n>/`.
//!
//! Only written when the run is started with `--debug`. The raw event stream
//! (`events.jsonl`) is tee'd there by the agent invocation itself; the rest is
//! written once the iteration is finalized.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::SecondsFormat;
use serde::Serialize;

use crate::core::mode::RunMode;
use crate::core::types::IterationRecord;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iter: u32,
    pub mode: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub signal_observed: bool,
    pub output_bytes: usize,
    pub output_truncated: usize,
    pub malformed_lines: usize,
}

impl IterationMeta {
    pub fn from_record(
        run_id: &str,
        mode: RunMode,
        record: &IterationRecord,
        malformed_lines: usize,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            iter: record.ordinal,
            mode: mode.as_str().to_string(),
            started_at: record
                .started_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            ended_at: record
                .finished_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: record.duration_ms(),
            exit_code: record.exit_code,
            timed_out: record.timed_out,
            signal_observed: record.signal_observed,
            output_bytes: record.output.len(),
            output_truncated: record.output_truncated,
            malformed_lines,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub events_path: PathBuf,
    pub transcript_path: PathBuf,
    pub meta_path: PathBuf,
}

/// Directory holding every iteration of one run.
pub fn run_dir(root: &Path, run_id: &str) -> PathBuf {
    iterations_dir(root).join(run_id)
}

fn iterations_dir(root: &Path) -> PathBuf {
    root.join(".ralph").join("iterations")
}

/// Create the run directory for `run_id`, or for `run_id-2`, `run_id-3`, ...
/// when an earlier run already owns it. Returns the id that was claimed.
pub fn claim_run_id(root: &Path, run_id: &str) -> Result<String> {
    let parent = iterations_dir(root);
    fs::create_dir_all(&parent)
        .with_context(|| format!("create iterations dir {}", parent.display()))?;
    let mut candidate = run_id.to_string();
    for suffix in 2u32.. {
        let dir = run_dir(root, &candidate);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                candidate = format!("{run_id}-{suffix}");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir {}", dir.display()));
            }
        }
    }
    bail!("no free run directory for {run_id}")
}

impl IterationPaths {
    pub fn new(root: &Path, run_id: &str, iter: u32) -> Self {
        let dir = run_dir(root, run_id).join(iter.to_string());
        Self {
            dir: dir.clone(),
            prompt_path: dir.join("prompt.md"),
            events_path: dir.join("events.jsonl"),
            transcript_path: dir.join("output.txt"),
            meta_path: dir.join("meta.json"),
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub paths: &'a IterationPaths,
    pub meta: &'a IterationMeta,
    pub prompt: &'a [u8],
    pub transcript: &'a str,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<()> {
    let paths = request.paths;
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    write_bytes(&paths.prompt_path, request.prompt)?;
    write_bytes(&paths.transcript_path, request.transcript.as_bytes())?;
    let mut buf = serde_json::to_string_pretty(request.meta)?;
    buf.push('\n');
    write_bytes(&paths.meta_path, buf.as_bytes())
}

fn write_bytes(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn iteration_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = IterationPaths::new(temp.path(), "20261018T093000Z", 3);

        assert!(
            paths
                .dir
                .ends_with(Path::new(".ralph/iterations/20261018T093000Z/3"))
        );
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.events_path.ends_with("events.jsonl"));
        assert!(paths.transcript_path.ends_with("output.txt"));
        assert!(paths.meta_path.ends_with("meta.json"));
    }

    #[test]
    fn claiming_a_taken_run_id_adds_a_suffix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = claim_run_id(temp.path(), "20261018T093000.000Z").expect("first");
        let second = claim_run_id(temp.path(), "20261018T093000.000Z").expect("second");
        let third = claim_run_id(temp.path(), "20261018T093000.000Z").expect("third");

        assert_eq!(first, "20261018T093000.000Z");
        assert_eq!(second, "20261018T093000.000Z-2");
        assert_eq!(third, "20261018T093000.000Z-3");
        assert!(run_dir(temp.path(), &second).is_dir());
    }

    #[test]
    fn writes_prompt_transcript_and_meta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();
        let record = IterationRecord {
            ordinal: 2,
            started_at: at,
            finished_at: at,
            prompt: b"prompt \\n bytes".to_vec(),
            output: b"raw".to_vec(),
            output_truncated: 12,
            exit_code: Some(1),
            timed_out: false,
            signal_observed: false,
        };
        let meta = IterationMeta::from_record("run-1", RunMode::Plan, &record, 2);
        let paths = IterationPaths::new(temp.path(), "run-1", 2);

        write_iteration(&IterationWriteRequest {
            paths: &paths,
            meta: &meta,
            prompt: &record.prompt,
            transcript: "hello",
        })
        .expect("write");

        assert_eq!(fs::read(&paths.prompt_path).expect("prompt"), record.prompt);
        assert_eq!(
            fs::read_to_string(&paths.transcript_path).expect("transcript"),
            "hello"
        );
        let meta_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("meta"))
                .expect("parse meta");
        assert_eq!(meta_json["iter"], 2);
        assert_eq!(meta_json["mode"], "plan");
        assert_eq!(meta_json["exit_code"], 1);
        assert_eq!(meta_json["malformed_lines"], 2);
        assert_eq!(meta_json["output_truncated"], 12);
    }
}
