//! Error types for shell_pool.
//!
//! This module defines two main error categories:
//! - [`StartError`]: failures while bringing shells up - the pool is unchanged or partially grown
//! - [`RunError`]: failures while executing a command - the runner involved is evicted
//!
//! A runner that produced a [`RunError`] is never returned to the pool, so the
//! pool keeps its permit/runner accounting with a strictly smaller capacity.

use thiserror::Error;

/// Failure while starting the auxiliary shell or growing the runner pool.
#[derive(Debug, Error)]
pub enum StartError {
    /// No bash candidate exists on this host.
    #[error("no usable bash found (searched {searched})")]
    ShellNotFound { searched: String },

    /// The OS refused to spawn a shell process.
    #[error("failed to spawn shell: {reason}")]
    SpawnFailed { reason: String },

    /// Requested shell count is zero or exceeds the configured ceiling.
    #[error("shell count {requested} out of range (1..{max})")]
    Insane { requested: usize, max: usize },

    /// The auxiliary shell was started earlier but is no longer running.
    #[error("auxiliary shell is not running")]
    AuxDead,
}

/// Failure while executing a command on a pooled runner.
#[derive(Debug, Error)]
pub enum RunError {
    /// Could not stage the command into a temporary script file.
    #[error("failed to stage command script: {reason}")]
    Script { reason: String },

    /// The ping round-trip returned something other than `ping`.
    ///
    /// Residue from an earlier command is sitting in the runner's streams;
    /// the runner is evicted.
    #[error("runner failed ping check (got {got:?})")]
    RunnerCorrupted { got: String },

    /// The runner shell died: its death trap fired, a stream hit EOF, or a
    /// write to its stdin failed.
    #[error("runner shell died unexpectedly")]
    RunnerDied,

    /// A non-blank line outside the framing grammar appeared on a runner
    /// stream.
    #[error("unexpected line from runner: {line:?}")]
    ProtocolViolation { line: String },

    /// The auxiliary shell is missing or dead when an operation needs it.
    #[error("auxiliary shell is not running")]
    AuxDead,

    /// Both end sentinels arrived but no integer exit status was seen.
    #[error("command finished without reporting an exit status")]
    Incomplete,
}

/// Combined error type for callers that start and run through one surface.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Run(#[from] RunError),
}
