//! The auxiliary shell: subtree kills and background launches.
//!
//! One long-lived bash, started on the first `start` call and never replaced.
//! It is only ever written to, in short single lines under the pool's state
//! lock, so its stdout and stderr are discarded at spawn time.

use crate::bash::bash_command;
use crate::error::{RunError, StartError};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};

/// Recursively lists a PID and all of its descendants, one per line.
const ALLKIDS: &str = "allkids() { echo $1; for kid in $(pgrep -P $1); do allkids $kid; done; }\n";

pub(crate) struct AuxShell {
    child: Child,
    stdin: ChildStdin,
}

impl AuxShell {
    pub(crate) async fn spawn() -> Result<Self, StartError> {
        let mut command = bash_command()?;
        command.stdout(Stdio::null()).stderr(Stdio::null());
        let mut child = command.spawn().map_err(|e| StartError::SpawnFailed {
            reason: e.to_string(),
        })?;
        let stdin = child.stdin.take().expect("stdin piped");

        let mut aux = Self { child, stdin };
        aux.write(ALLKIDS)
            .await
            .map_err(|e| StartError::SpawnFailed {
                reason: e.to_string(),
            })?;
        Ok(aux)
    }

    pub(crate) fn alive(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// SIGKILL `pid` and every transitive descendant.
    ///
    /// Best-effort: termination is not confirmed here; the caller drains the
    /// runner's streams to a sentinel afterwards.
    pub(crate) async fn kill_tree(&mut self, pid: u32) -> Result<(), RunError> {
        if !self.alive() {
            return Err(RunError::AuxDead);
        }
        self.write(&format!("kill -9 $(allkids {pid})\n"))
            .await
            .map_err(|_| RunError::AuxDead)
    }

    /// Launch `cmd` detached. No output is captured and no status reported.
    pub(crate) async fn launch(&mut self, cmd: &str) -> Result<(), RunError> {
        if !self.alive() {
            return Err(RunError::AuxDead);
        }
        self.write(&format!("({cmd}) &\n"))
            .await
            .map_err(|_| RunError::AuxDead)
    }

    async fn write(&mut self, text: &str) -> std::io::Result<()> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.flush().await
    }
}
