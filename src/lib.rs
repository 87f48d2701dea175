//! # shell_pool
//!
//! A pool of pre-forked bash workers for host applications that need to run
//! external shell commands with line-by-line output delivery, exact exit
//! statuses, bounded parallelism, and the ability to kill an in-flight
//! command together with every process it spawned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shell_pool::{OutputStream, ShellPool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ShellPool::new();
//! pool.start(2).await?;
//!
//! let mut lines = Vec::new();
//! let status = pool
//!     .run("echo out; echo err 1>&2", |line, stream| {
//!         lines.push((line.to_string(), stream));
//!     })
//!     .await?;
//!
//! assert_eq!(status, 0);
//! assert!(lines.contains(&("out".to_string(), OutputStream::Stdout)));
//! assert!(lines.contains(&("err".to_string(), OutputStream::Stderr)));
//! # Ok(())
//! # }
//! ```
//!
//! ## How it works
//!
//! - **Workers are checked out, not spawned.** `start(n)` pre-forks `n`
//!   long-lived bash processes; each `run` borrows one exclusively for the
//!   duration of the command, blocking when all are busy.
//! - **Output is framed, not guessed.** A driver script tags the command's
//!   stdout lines with `+` and its stderr lines with `-`, merges them onto
//!   one stream, and brackets everything with sentinel lines that carry the
//!   real exit status. User output can never be confused with the framing.
//! - **Cleanup is recursive.** A single auxiliary shell kills an interrupted
//!   command's entire process subtree via `pgrep -P`, after which the worker
//!   is drained back to a known-good state and returned to the pool - or
//!   evicted if it cannot be recovered.
//!
//! ## Platform Support
//!
//! Unix only (Linux, macOS), and bash specifically: the framing relies on
//! `$BASHPID`, `set -o pipefail`, and fd-3 stream swapping, and the subtree
//! kill on `pgrep -P` and `kill -- -PID`.

#[cfg(windows)]
compile_error!(
    "shell_pool does not support Windows. \
     The worker protocol depends on a Bourne-Again shell, POSIX process \
     groups, and pgrep-based subtree termination."
);

mod aux_shell;
mod bash;
mod config;
mod error;
mod exec;
mod framing;
mod output;
mod pool;
mod runner;

// Public API
pub use config::{PoolConfig, DEFAULT_MAX_SHELLS};
pub use error::{PoolError, RunError, StartError};
pub use output::{print_line, OutputStream};
pub use pool::ShellPool;
