//! A pooled worker shell.

use crate::bash::bash_command;
use crate::error::StartError;
use crate::framing;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};

/// A long-lived bash owned by the pool, held by one run at a time.
///
/// `error` marks the runner irrecoverable; an errored runner is never pushed
/// back onto the idle list and its semaphore permit is never repaid.
pub(crate) struct Runner {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    pub(crate) error: bool,
}

impl Runner {
    /// Spawn a fresh worker shell and install its death trap, so a fatal
    /// signal to the shell surfaces as `SHELLPOOL_UNEXPECTED_DEATH` on both
    /// of its streams.
    pub(crate) async fn spawn() -> Result<Self, StartError> {
        let mut command = bash_command()?;
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| StartError::SpawnFailed {
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().expect("stdin piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout piped")).lines();
        let stderr = BufReader::new(child.stderr.take().expect("stderr piped")).lines();

        let mut runner = Self {
            child,
            stdin,
            stdout,
            stderr,
            error: false,
        };
        runner
            .send(&framing::death_trap())
            .await
            .map_err(|e| StartError::SpawnFailed {
                reason: e.to_string(),
            })?;
        Ok(runner)
    }

    /// Conservative liveness check: only a reaped exit counts as dead.
    /// A false positive is caught later by the ping or the death sentinel.
    pub(crate) fn alive(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(Some(_)))
    }

    pub(crate) async fn send(&mut self, text: &str) -> std::io::Result<()> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// Next line of the runner's stdout; `None` on EOF.
    pub(crate) async fn next_stdout(&mut self) -> std::io::Result<Option<String>> {
        self.stdout.next_line().await
    }

    /// Next line of the runner's stderr; `None` on EOF.
    pub(crate) async fn next_stderr(&mut self) -> std::io::Result<Option<String>> {
        self.stderr.next_line().await
    }
}
