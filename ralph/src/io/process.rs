//! Helpers for running child processes with an optional timeout and bounded output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::completion::SignalScanner;

/// Where to mirror stdout lines while the child runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tee {
    None,
    /// Echo to our own stdout so the operator can follow along.
    Stdout,
    /// Write to a file, flushing after each line.
    File(PathBuf),
}

/// How to feed, watch and bound one child process.
#[derive(Debug, Clone, Copy)]
pub struct CollectOptions<'a> {
    pub stdin: Option<&'a [u8]>,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Bytes kept in memory per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
    pub tee: &'a Tee,
    /// Pattern searched for over the whole stdout stream, including bytes past the limit.
    pub watch: Option<&'a [u8]>,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// The watched pattern appeared somewhere on stdout.
    pub watch_seen: bool,
}

/// Spawn `cmd` with piped stdout/stderr (and stdin when `with_stdin`).
///
/// On unix the child leads its own process group so a timeout can take down
/// anything it spawned. Kept separate from [`collect_output`] so callers can
/// tell "could not start" apart from failures of a running child.
pub fn spawn_piped(mut cmd: Command, with_stdin: bool) -> std::io::Result<Child> {
    if with_stdin {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    debug!("spawning child process");
    cmd.spawn()
}

/// Feed stdin, drain stdout/stderr concurrently, and wait for the child.
///
/// The timeout clock covers the stdin write as well as the run itself. On
/// timeout, and on any error after spawn, the child's process group is killed
/// and reaped before returning.
#[instrument(skip_all, fields(
    timeout_secs = options.timeout.map(|t| t.as_secs()),
    output_limit_bytes = options.output_limit_bytes
))]
pub fn collect_output(mut child: Child, options: &CollectOptions<'_>) -> Result<CommandOutput> {
    let pipes = child
        .stdout
        .take()
        .zip(child.stderr.take())
        .ok_or_else(|| anyhow!("stdout/stderr were not piped"));
    let (stdout, stderr) = match pipes {
        Ok(pipes) => pipes,
        Err(err) => return Err(abort(&mut child, err)),
    };
    let sink = match open_tee(options.tee) {
        Ok(sink) => sink,
        Err(err) => return Err(abort(&mut child, err)),
    };

    let limit = options.output_limit_bytes;
    let scanner = options.watch.map(SignalScanner::new);
    let stdout_handle =
        thread::spawn(move || read_lines_limited_with_tee(stdout, limit, sink, scanner));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    // Written from its own thread so a child that never reads stdin cannot
    // stall us past the timeout.
    let stdin_handle = match options.stdin {
        Some(input) => {
            let Some(child_stdin) = child.stdin.take() else {
                return Err(abort(&mut child, anyhow!("stdin was not piped")));
            };
            let input = input.to_vec();
            Some(thread::spawn(move || write_stdin(child_stdin, &input)))
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match options.timeout {
        None => child.wait().context("wait for command")?,
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                timed_out = true;
                kill_process_tree(&mut child).context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
    };

    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(result) => result.context("write stdin")?,
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }
    let stdout = join_output(stdout_handle).context("join stdout")?;
    let stderr = join_output(stderr_handle).context("join stderr")?;

    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        timed_out,
        watch_seen: stdout.watch_seen,
    })
}

/// Kill and reap a child we are giving up on, passing `err` through.
fn abort(child: &mut Child, err: anyhow::Error) -> anyhow::Error {
    if let Err(kill_err) = kill_process_tree(child) {
        warn!(err = %kill_err, "failed to kill child after error");
    }
    if let Err(wait_err) = child.wait() {
        warn!(err = %wait_err, "failed to reap child after error");
    }
    err
}

/// Kill the child's whole process group, falling back to the child alone.
fn kill_process_tree(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            Ok(()) => return Ok(()),
            Err(err) => debug!(err = %err, "process group kill failed, killing child only"),
        }
    }
    match child.kill() {
        Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

fn write_stdin(mut stdin: ChildStdin, input: &[u8]) -> std::io::Result<()> {
    match stdin.write_all(input) {
        Err(err) if err.kind() == ErrorKind::BrokenPipe => {
            warn!("child closed stdin before reading all input");
            Ok(())
        }
        other => other,
    }
}

struct StreamCapture {
    bytes: Vec<u8>,
    truncated: usize,
    watch_seen: bool,
}

fn join_output(handle: thread::JoinHandle<Result<StreamCapture>>) -> Result<StreamCapture> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

enum TeeSink {
    None,
    Stdout,
    File(BufWriter<File>),
}

fn open_tee(tee: &Tee) -> Result<TeeSink> {
    Ok(match tee {
        Tee::None => TeeSink::None,
        Tee::Stdout => TeeSink::Stdout,
        Tee::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create stream dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create stream file {}", path.display()))?;
            TeeSink::File(BufWriter::new(file))
        }
    })
}

impl TeeSink {
    fn write_line(&mut self, line: &[u8]) {
        let result = match self {
            Self::None => Ok(()),
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(line).and_then(|()| out.flush())
            }
            Self::File(writer) => writer.write_all(line).and_then(|()| writer.flush()),
        };
        if let Err(e) = result {
            warn!(err = %e, "failed to tee output line");
        }
    }
}

/// Read a stream line by line with a size limit, mirroring each line to `sink`
/// and feeding every line, kept or not, to `scanner`.
fn read_lines_limited_with_tee<R: Read>(
    reader: R,
    limit: usize,
    mut sink: TeeSink,
    mut scanner: Option<SignalScanner>,
) -> Result<StreamCapture> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        sink.write_line(&line);
        if let Some(scanner) = scanner.as_mut() {
            scanner.feed(&line);
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok(StreamCapture {
        bytes: collected,
        truncated,
        watch_seen: scanner.is_some_and(|scanner| scanner.seen()),
    })
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<StreamCapture> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok(StreamCapture {
        bytes: buf,
        truncated,
        watch_seen: false,
    })
}
