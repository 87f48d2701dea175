//! The execution engine: drive one command through a checked-out runner.

use crate::error::RunError;
use crate::framing::{self, CommandScript, StderrFrame, StdoutFrame};
use crate::output::OutputStream;
use crate::pool::{CheckedOut, ShellPool};
use crate::runner::Runner;
use std::path::Path;
use tracing::debug;

impl ShellPool {
    /// Execute `cmd` on a pooled runner, delivering each output line to
    /// `each_line` tagged with the stream it came from, and return the
    /// command's exact exit status.
    ///
    /// Blocks until a runner is free. Lines arrive in the order they reached
    /// the framing pipeline; stdout and stderr of the command are interleaved
    /// with no cross-stream ordering promise. A final line without a trailing
    /// newline is still delivered.
    ///
    /// If the returned future is dropped after the command started, the
    /// command's whole process subtree is killed and the runner is recovered
    /// on a detached task.
    ///
    /// # Errors
    ///
    /// See [`RunError`]; any error except [`RunError::Script`] evicts the
    /// runner involved.
    pub async fn run<F>(&self, cmd: &str, mut each_line: F) -> Result<i32, RunError>
    where
        F: FnMut(&str, OutputStream),
    {
        let debug_on = self.inner.config.debug;
        if debug_on {
            debug!(command = cmd, "dispatching command");
        }
        let script = CommandScript::stage(cmd).map_err(|e| RunError::Script {
            reason: e.to_string(),
        })?;

        let mut checked = self.checkout().await?;
        let result = drive(&mut checked, script.path(), &mut each_line, debug_on).await;
        checked.settle().await;

        if debug_on {
            match &result {
                Ok(status) => debug!(status, "command finished"),
                Err(error) => debug!(%error, "command failed"),
            }
        }
        result
    }
}

async fn drive<F>(
    checked: &mut CheckedOut,
    script: &Path,
    each_line: &mut F,
    debug_on: bool,
) -> Result<i32, RunError>
where
    F: FnMut(&str, OutputStream),
{
    let runner = checked.runner.as_mut().expect("runner checked out");

    ping(runner).await?;

    checked.dispatched = true;
    if runner.send(&framing::driver_script(script)).await.is_err() {
        runner.error = true;
        return Err(RunError::RunnerDied);
    }

    let pid = read_pid(runner).await?;
    checked.pid = Some(pid);
    if debug_on {
        debug!(pid, "command pipeline started");
    }

    let status = stdout_loop(runner, each_line).await?;
    checked.stdout_done = true;
    stderr_loop(runner).await?;
    checked.stderr_done = true;

    match status {
        Some(code) => Ok(code),
        None => {
            runner.error = true;
            Err(RunError::Incomplete)
        }
    }
}

/// Round-trip an `echo ping` to prove the runner's streams are empty of
/// residue before the driver goes out.
async fn ping(runner: &mut Runner) -> Result<(), RunError> {
    if runner.send(framing::PING).await.is_err() {
        runner.error = true;
        return Err(RunError::RunnerDied);
    }
    match runner.next_stdout().await {
        Ok(Some(line)) if line == framing::PONG => Ok(()),
        Ok(Some(line)) => {
            runner.error = true;
            Err(RunError::RunnerCorrupted { got: line })
        }
        _ => {
            runner.error = true;
            Err(RunError::RunnerDied)
        }
    }
}

/// The first non-blank stderr line of a command must be the PID
/// announcement; the driver writes it before `wait`, and the user command
/// cannot reach the driver's own stderr.
async fn read_pid(runner: &mut Runner) -> Result<u32, RunError> {
    loop {
        let line = match runner.next_stderr().await {
            Ok(Some(line)) => line,
            _ => {
                runner.error = true;
                return Err(RunError::RunnerDied);
            }
        };
        if line.is_empty() {
            continue;
        }
        if line == framing::DEATH_LINE {
            runner.error = true;
            return Err(RunError::RunnerDied);
        }
        return match framing::parse_pid(&line) {
            Some(pid) => Ok(pid),
            None => {
                runner.error = true;
                Err(RunError::ProtocolViolation { line })
            }
        };
    }
}

/// Consume the merged, prefixed stream until the exit sentinel, delivering
/// user lines and capturing the status announcement.
async fn stdout_loop<F>(runner: &mut Runner, each_line: &mut F) -> Result<Option<i32>, RunError>
where
    F: FnMut(&str, OutputStream),
{
    let mut status = None;
    loop {
        let line = match runner.next_stdout().await {
            Ok(Some(line)) => line,
            _ => {
                runner.error = true;
                return Err(RunError::RunnerDied);
            }
        };
        match framing::classify_stdout(&line) {
            StdoutFrame::Blank => {}
            StdoutFrame::Line(stream, text) => each_line(text, stream),
            StdoutFrame::Status(code) => status = Some(code),
            StdoutFrame::Exit => return Ok(status),
            StdoutFrame::Death => {
                runner.error = true;
                return Err(RunError::RunnerDied);
            }
            StdoutFrame::Unexpected => {
                runner.error = true;
                return Err(RunError::ProtocolViolation { line: line.clone() });
            }
        }
    }
}

/// After the stdout sentinel, stderr holds nothing but blanks and its own
/// sentinel; the PID line was consumed before the loops began.
async fn stderr_loop(runner: &mut Runner) -> Result<(), RunError> {
    loop {
        let line = match runner.next_stderr().await {
            Ok(Some(line)) => line,
            _ => {
                runner.error = true;
                return Err(RunError::RunnerDied);
            }
        };
        match framing::classify_stderr(&line) {
            StderrFrame::Blank => {}
            StderrFrame::Exit => return Ok(()),
            StderrFrame::Death => {
                runner.error = true;
                return Err(RunError::RunnerDied);
            }
            StderrFrame::Unexpected => {
                runner.error = true;
                return Err(RunError::ProtocolViolation { line });
            }
        }
    }
}
