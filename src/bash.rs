//! Locating and spawning the worker shell binary.
//!
//! All pool shells are Bourne-Again shells: the framing protocol relies on
//! `$BASHPID`, `set -o pipefail`, and fd-3 redirection, none of which plain
//! `/bin/sh` guarantees.

use crate::error::StartError;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;

/// Ordered search list; the first usable candidate wins.
const BASH_CANDIDATES: &[&str] = &["/bin/bash", "/usr/bin/bash", "/usr/local/bin/bash"];

static RESOLVED: OnceLock<PathBuf> = OnceLock::new();

/// Locate bash, caching the winner for the life of the process.
///
/// # Errors
///
/// `ShellNotFound` if no candidate is a regular executable file.
pub(crate) fn find_bash() -> Result<&'static Path, StartError> {
    if let Some(path) = RESOLVED.get() {
        return Ok(path.as_path());
    }
    for candidate in BASH_CANDIDATES {
        let path = Path::new(candidate);
        if is_usable(path) {
            return Ok(RESOLVED.get_or_init(|| path.to_path_buf()).as_path());
        }
    }
    Err(StartError::ShellNotFound {
        searched: BASH_CANDIDATES.join(", "),
    })
}

/// Build a bash command with piped stdin, ready for the caller to choose
/// output plumbing and spawn.
///
/// `kill_on_drop` is set so shells never outlive the pool that owns them.
pub(crate) fn bash_command() -> Result<Command, StartError> {
    let bash = find_bash()?;
    let mut command = Command::new(bash);
    command.stdin(Stdio::piped()).kill_on_drop(true);
    Ok(command)
}

fn is_usable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && is_executable(&metadata),
        Err(_) => false,
    }
}

/// Check if a file is executable by the current user.
fn is_executable(metadata: &Metadata) -> bool {
    let mode = metadata.permissions().mode();

    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    if uid == metadata.uid() && (mode & 0o100) != 0 {
        return true;
    }
    if gid == metadata.gid() && (mode & 0o010) != 0 {
        return true;
    }
    if (mode & 0o001) != 0 {
        return true;
    }
    // Root can execute anything with any execute bit set.
    if uid == 0 && (mode & 0o111) != 0 {
        return true;
    }
    false
}
