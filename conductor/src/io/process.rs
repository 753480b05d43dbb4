//! Runs a worker command: JSON in on stdin, bounded capture of stdout and
//! stderr, killed once the task deadline passes.

use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream plus the count of bytes discarded.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: u64,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

/// What a finished (or killed) worker process left behind.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Trimmed stderr for error messages, noting any dropped tail.
    pub fn stderr_summary(&self) -> String {
        match self.stderr.dropped {
            0 => self.stderr.text(),
            dropped => format!("{} [{dropped} more bytes dropped]", self.stderr.text()),
        }
    }
}

/// Spawn `cmd`, feed it `input`, and wait at most `timeout`.
///
/// Stdin is written and both output pipes are drained on their own threads,
/// so neither side can block on a full pipe. Only the first `limit` bytes of
/// each stream are kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), limit))]
pub fn run_with_deadline(
    mut cmd: Command,
    input: &[u8],
    timeout: Duration,
    limit: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn worker process")?;
    debug!(pid = child.id(), "worker process spawned");

    let stdout = capture(child.stdout.take(), limit).context("capture stdout")?;
    let stderr = capture(child.stderr.take(), limit).context("capture stderr")?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let input = input.to_vec();
    let writer = thread::spawn(move || match stdin.write_all(&input) {
        // A child that exits without reading its input closes the pipe early.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    });

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for worker")? {
        Some(status) => (status, false),
        None => {
            warn!("worker process overran its deadline; killing");
            child.kill().context("kill worker process")?;
            (child.wait().context("reap worker process")?, true)
        }
    };

    writer
        .join()
        .map_err(|_| anyhow!("stdin writer panicked"))?
        .context("write worker stdin")?;
    let stdout = finish(stdout).context("collect stdout")?;
    let stderr = finish(stderr).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(stdout_dropped = stdout.dropped, stderr_dropped = stderr.dropped, "output over limit");
    }
    debug!(exit_code = ?status.code(), timed_out, "worker process finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn capture<R: Read + Send + 'static>(
    stream: Option<R>,
    limit: usize,
) -> Result<JoinHandle<io::Result<Captured>>> {
    let mut stream = stream.ok_or_else(|| anyhow!("stream was not piped"))?;
    Ok(thread::spawn(move || {
        let mut captured = Captured::default();
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        stream.by_ref().take(limit).read_to_end(&mut captured.bytes)?;
        captured.dropped = io::copy(&mut stream, &mut io::sink())?;
        Ok(captured)
    }))
}

fn finish(handle: JoinHandle<io::Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader panicked"))?
        .context("read output")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn input_reaches_the_child() {
        let output = run_with_deadline(Command::new("cat"), b"{\"id\":1}", Duration::from_secs(5), 1024)
            .expect("run cat");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(output.stdout.text(), "{\"id\":1}");
    }

    #[test]
    fn output_past_the_limit_is_counted_not_kept() {
        let output = run_with_deadline(
            shell("printf 'abcdefghij'; printf 'oops' >&2"),
            b"",
            Duration::from_secs(5),
            4,
        )
        .expect("run printf");
        assert_eq!(output.stdout.bytes, b"abcd");
        assert_eq!(output.stdout.dropped, 6);
        assert_eq!(output.stderr_summary(), "oops");
    }

    #[test]
    fn child_ignoring_stdin_is_not_an_error() {
        let output = run_with_deadline(shell("exit 3"), &[b'x'; 1 << 20], Duration::from_secs(5), 64)
            .expect("run exit");
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn overrun_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_with_deadline(cmd, b"", Duration::from_millis(100), 1024)
            .expect("run sleep");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }
}
