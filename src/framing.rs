//! The framing protocol spoken over a runner shell's standard streams.
//!
//! A command is executed by writing a short driver script to the runner's
//! stdin. The driver tags every line of the command's stdout with `+` and
//! every line of its stderr with `-`, merges both onto the runner's stdout,
//! and brackets the whole exchange with sentinel lines:
//!
//! - `SHELLPOOL_PID <p>` on stderr, before anything else, naming the subshell
//!   that runs the command (the kill target);
//! - `SHELLPOOL_STATUS <n>` on stdout after all command output;
//! - `SHELLPOOL_EXIT` on both streams as the final sentinel;
//! - `SHELLPOOL_UNEXPECTED_DEATH` on both streams if the runner takes a
//!   fatal signal.
//!
//! Control lines carry no prefix and user content always does, so user output
//! can never be mistaken for a control line, and vice versa.

use crate::output::OutputStream;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub(crate) const EXIT_LINE: &str = "SHELLPOOL_EXIT";
pub(crate) const STATUS_LINE: &str = "SHELLPOOL_STATUS";
pub(crate) const PID_LINE: &str = "SHELLPOOL_PID";
pub(crate) const DEATH_LINE: &str = "SHELLPOOL_UNEXPECTED_DEATH";

/// Sent to a runner before each command; the reply must be [`PONG`].
pub(crate) const PING: &str = "echo ping\n";
pub(crate) const PONG: &str = "ping";

/// Trap installed on every runner at spawn so that a fatal signal is visible
/// in both of its streams.
pub(crate) fn death_trap() -> String {
    format!("trap 'echo {d}; echo {d} 1>&2; exit 1' HUP INT TERM\n", d = DEATH_LINE)
}

/// Emit the end sentinel on both streams without running a command.
///
/// Used to resynchronize a runner that was checked out but never given a
/// driver script, so the recovery drain has a sentinel to find.
pub(crate) fn resync() -> String {
    format!("echo {exit}\necho {exit} 1>&2\n", exit = EXIT_LINE)
}

/// A user command staged in a temporary script file.
///
/// The file carries a process-group trap so an interrupt delivered to the
/// command propagates to everything it spawned. It is removed when the value
/// drops, which covers every exit path of a run.
pub(crate) struct CommandScript {
    file: NamedTempFile,
}

impl CommandScript {
    pub(crate) fn stage(cmd: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("shellpool-")
            .suffix(".tmp")
            .tempfile()?;
        file.write_all(command_script(cmd).as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }
}

fn command_script(cmd: &str) -> String {
    format!("trap 'kill -- -$BASHPID' INT TERM\n{cmd}\n")
}

/// The driver script written to a runner's stdin to execute `script`.
///
/// The core pipeline swaps fd1/fd2 through fd3 so stderr flows through the
/// `-` rewriter while stdout flows through the `+` rewriter, then merges both
/// onto the runner's stdout. It runs in the background so its PID can be
/// announced before `wait` blocks; `pipefail` preserves the command's real
/// exit status across the rewriters. The `|| [ -n "$line" ]` clause lets a
/// final unterminated line through the rewriters.
pub(crate) fn driver_script(script: &Path) -> String {
    format!(
        "set -o pipefail\n\
         shellpool_plus() {{ local line; while IFS= read -r line || [ -n \"$line\" ]; do printf '+%s\\n' \"$line\"; done; }}\n\
         shellpool_minus() {{ local line; while IFS= read -r line || [ -n \"$line\" ]; do printf '-%s\\n' \"$line\"; done; }}\n\
         ( ( bash '{script}' < /dev/null | shellpool_plus ) 3>&1 1>&2 2>&3 | shellpool_minus ) 2>&1 &\n\
         echo \"{pid} $!\" 1>&2\n\
         wait $!\n\
         shellpool_status=$?\n\
         echo\n\
         echo \"{status} $shellpool_status\"\n\
         echo {exit}\n\
         echo {exit} 1>&2\n",
        script = script.display(),
        pid = PID_LINE,
        status = STATUS_LINE,
        exit = EXIT_LINE,
    )
}

/// One parsed line of a runner's stdout during a command.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StdoutFrame<'a> {
    /// Blank line; ignored.
    Blank,
    /// A line of user output, tagged with the stream it came from.
    Line(OutputStream, &'a str),
    /// The command's exit status.
    Status(i32),
    /// End of the stdout stream for this command.
    Exit,
    /// The runner's death trap fired.
    Death,
    /// Outside the grammar.
    Unexpected,
}

pub(crate) fn classify_stdout(line: &str) -> StdoutFrame<'_> {
    if line.is_empty() {
        return StdoutFrame::Blank;
    }
    if let Some(rest) = line.strip_prefix('+') {
        return StdoutFrame::Line(OutputStream::Stdout, rest);
    }
    if let Some(rest) = line.strip_prefix('-') {
        return StdoutFrame::Line(OutputStream::Stderr, rest);
    }
    if let Some(rest) = line.strip_prefix(STATUS_LINE) {
        return match rest.strip_prefix(' ').map(str::parse) {
            Some(Ok(code)) => StdoutFrame::Status(code),
            _ => StdoutFrame::Unexpected,
        };
    }
    match line {
        EXIT_LINE => StdoutFrame::Exit,
        DEATH_LINE => StdoutFrame::Death,
        _ => StdoutFrame::Unexpected,
    }
}

/// One parsed line of a runner's stderr after the PID announcement.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StderrFrame {
    Blank,
    Exit,
    Death,
    Unexpected,
}

pub(crate) fn classify_stderr(line: &str) -> StderrFrame {
    match line {
        "" => StderrFrame::Blank,
        EXIT_LINE => StderrFrame::Exit,
        DEATH_LINE => StderrFrame::Death,
        _ => StderrFrame::Unexpected,
    }
}

/// Parse the `SHELLPOOL_PID <p>` announcement.
pub(crate) fn parse_pid(line: &str) -> Option<u32> {
    line.strip_prefix(PID_LINE)?
        .strip_prefix(' ')?
        .trim()
        .parse()
        .ok()
}
