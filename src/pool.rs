//! The runner pool.
//!
//! A `ShellPool` owns the auxiliary shell and a set of worker shells. Runners
//! are handed out under a counting semaphore whose permits mirror the idle
//! list: a waiter woken by a permit always finds a usable runner. A runner
//! that errors is dropped and its permit forgotten, so the accounting holds
//! with a strictly smaller pool.
//!
//! The state lock is only ever held for O(1) bookkeeping and single-line
//! auxiliary-shell writes, never across runner-stream I/O.

use crate::aux_shell::AuxShell;
use crate::config::PoolConfig;
use crate::error::{RunError, StartError};
use crate::framing;
use crate::runner::Runner;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// A bounded pool of pre-forked bash workers.
///
/// Cheap to clone; all clones share the same shells. Dropping the last clone
/// kills every worker and the auxiliary shell.
///
/// ```no_run
/// use shell_pool::{ShellPool, print_line};
///
/// # async fn example() -> Result<(), shell_pool::PoolError> {
/// let pool = ShellPool::new();
/// pool.start(2).await?;
/// let status = pool.run("echo hello", print_line).await?;
/// assert_eq!(status, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ShellPool {
    pub(crate) inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) state: Mutex<PoolState>,
}

pub(crate) struct PoolState {
    pub(crate) aux: Option<AuxShell>,
    pub(crate) idle: Vec<Runner>,
    pub(crate) total: usize,
}

impl Default for ShellPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellPool {
    /// Create an empty pool with default configuration. No shells are
    /// spawned until [`start`](Self::start) is called.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create an empty pool with the given configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                semaphore: Arc::new(Semaphore::new(0)),
                state: Mutex::new(PoolState {
                    aux: None,
                    idle: Vec::new(),
                    total: 0,
                }),
            }),
        }
    }

    /// Ensure the auxiliary shell exists and add `count` runners.
    ///
    /// # Errors
    ///
    /// - `Insane` if `count` is zero or at least the configured ceiling
    /// - `ShellNotFound` / `SpawnFailed` if shells cannot be brought up
    /// - `AuxDead` if a previously started auxiliary shell has died
    pub async fn start(&self, count: usize) -> Result<(), StartError> {
        self.check_count(count)?;
        let mut state = self.inner.state.lock().await;
        self.ensure_aux(&mut state).await?;
        self.add_runners(&mut state, count).await
    }

    /// Top the pool up so at least `count` runners exist in total,
    /// counting those currently executing commands.
    pub async fn ensure(&self, count: usize) -> Result<(), StartError> {
        self.check_count(count)?;
        let mut state = self.inner.state.lock().await;
        self.ensure_aux(&mut state).await?;
        if state.total < count {
            let missing = count - state.total;
            self.add_runners(&mut state, missing).await
        } else {
            Ok(())
        }
    }

    /// Launch `cmd` detached via the auxiliary shell. Fire and forget: no
    /// output, no PID, no exit status.
    ///
    /// # Errors
    ///
    /// `AuxDead` if the pool was never started or the auxiliary shell died.
    pub async fn run_background(&self, cmd: &str) -> Result<(), RunError> {
        let mut state = self.inner.state.lock().await;
        match state.aux.as_mut() {
            Some(aux) => {
                if self.inner.config.debug {
                    debug!(command = cmd, "launching background command");
                }
                aux.launch(cmd).await
            }
            None => Err(RunError::AuxDead),
        }
    }

    /// Total runners alive, idle or in flight.
    pub async fn runner_count(&self) -> usize {
        self.inner.state.lock().await.total
    }

    /// Runners currently waiting for work.
    pub async fn idle_runners(&self) -> usize {
        self.inner.state.lock().await.idle.len()
    }

    /// Semaphore permits currently available. At rest this equals
    /// [`idle_runners`](Self::idle_runners).
    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    fn check_count(&self, count: usize) -> Result<(), StartError> {
        let max = self.inner.config.max_shells;
        if count == 0 || count >= max {
            return Err(StartError::Insane {
                requested: count,
                max,
            });
        }
        Ok(())
    }

    async fn ensure_aux(&self, state: &mut PoolState) -> Result<(), StartError> {
        match state.aux.as_mut() {
            Some(aux) => {
                if !aux.alive() {
                    return Err(StartError::AuxDead);
                }
            }
            None => {
                state.aux = Some(AuxShell::spawn().await?);
                info!("auxiliary shell started");
            }
        }
        Ok(())
    }

    async fn add_runners(&self, state: &mut PoolState, count: usize) -> Result<(), StartError> {
        for _ in 0..count {
            let runner = Runner::spawn().await?;
            state.idle.push(runner);
            state.total += 1;
            self.inner.semaphore.add_permits(1);
        }
        info!(added = count, total = state.total, "runners added to pool");
        Ok(())
    }

    /// Check out one runner, blocking until a permit is available.
    ///
    /// A runner found dead at check-out is evicted on the spot and the call
    /// fails; the permit semantics guarantee another caller is not woken for
    /// it.
    pub(crate) async fn checkout(&self) -> Result<CheckedOut, RunError> {
        if self.inner.state.lock().await.aux.is_none() {
            return Err(RunError::AuxDead);
        }
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore closed");
        let mut runner = {
            let mut state = self.inner.state.lock().await;
            state.idle.pop().expect("permit held without an idle runner")
        };
        if !runner.alive() {
            warn!("checked out a dead runner, evicting");
            runner.error = true;
            evict(&self.inner, Some(permit)).await;
            return Err(RunError::RunnerDied);
        }
        Ok(CheckedOut {
            pool: self.inner.clone(),
            runner: Some(runner),
            permit: Some(permit),
            pid: None,
            dispatched: false,
            stdout_done: false,
            stderr_done: false,
        })
    }
}

/// Exclusive hold on a runner for the duration of one command.
///
/// Every exit path returns the runner to the pool: the engine calls
/// [`settle`](Self::settle) on normal and error returns, and if the owning
/// future is dropped mid-command the `Drop` impl hands the reclaim to a
/// detached task so the kill-and-drain still happens.
pub(crate) struct CheckedOut {
    pub(crate) pool: Arc<PoolInner>,
    pub(crate) runner: Option<Runner>,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
    /// PID of the driver's backgrounded pipeline, once announced.
    pub(crate) pid: Option<u32>,
    /// Whether the driver script reached the runner's stdin.
    pub(crate) dispatched: bool,
    pub(crate) stdout_done: bool,
    pub(crate) stderr_done: bool,
}

impl CheckedOut {
    /// Return the runner to the pool, recovering it first if needed.
    ///
    /// The reclaim runs on its own task so that cancelling the caller while
    /// it waits here cannot strand the runner or its permit mid-reclaim.
    pub(crate) async fn settle(mut self) {
        let Some(runner) = self.runner.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = self.pool.clone();
        let (pid, dispatched, stdout_done, stderr_done) =
            (self.pid, self.dispatched, self.stdout_done, self.stderr_done);
        let reclaimed = tokio::spawn(async move {
            reclaim(pool, runner, permit, pid, dispatched, stdout_done, stderr_done).await;
        });
        let _ = reclaimed.await;
    }
}

impl Drop for CheckedOut {
    fn drop(&mut self) {
        let Some(runner) = self.runner.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = self.pool.clone();
        let (pid, dispatched, stdout_done, stderr_done) =
            (self.pid, self.dispatched, self.stdout_done, self.stderr_done);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    reclaim(pool, runner, permit, pid, dispatched, stdout_done, stderr_done).await;
                });
            }
            Err(_) => {
                // No runtime left: the process is tearing down. Keep the
                // accounting consistent by not repaying the permit.
                if let Some(permit) = permit {
                    permit.forget();
                }
                if let Ok(mut state) = pool.state.try_lock() {
                    state.total -= 1;
                }
            }
        }
    }
}

/// Return a runner to the pool after a command, recovering it first if the
/// command was cut short.
///
/// If either stream has not reached its end sentinel, the in-flight process
/// subtree is killed through the auxiliary shell and both streams are drained
/// back to a sentinel. The drain is bounded: a runner that will not
/// resynchronize within `drain_timeout` is evicted.
async fn reclaim(
    pool: Arc<PoolInner>,
    mut runner: Runner,
    permit: Option<OwnedSemaphorePermit>,
    pid: Option<u32>,
    dispatched: bool,
    stdout_done: bool,
    stderr_done: bool,
) {
    if !(stdout_done && stderr_done) {
        if let Some(pid) = pid {
            let killed = {
                let mut state = pool.state.lock().await;
                match state.aux.as_mut() {
                    Some(aux) => aux.kill_tree(pid).await.is_ok(),
                    None => false,
                }
            };
            if !killed {
                warn!(pid, "could not kill command subtree, evicting runner");
                runner.error = true;
            }
        } else if !dispatched && !runner.error {
            // Nothing was ever sent; emit sentinels so the drain can land.
            if runner.send(&framing::resync()).await.is_err() {
                runner.error = true;
            }
        }
        if !runner.error {
            let drained =
                tokio::time::timeout(pool.config.drain_timeout, drain(&mut runner, stdout_done, stderr_done))
                    .await;
            if !matches!(drained, Ok(true)) {
                runner.error = true;
            }
        }
    }

    if runner.error {
        drop(runner);
        evict(&pool, permit).await;
    } else {
        let mut state = pool.state.lock().await;
        state.idle.push(runner);
        drop(state);
        drop(permit);
    }
}

/// Retire a runner for good: shrink the total and burn the permit so no
/// waiter is woken for a runner that no longer exists.
async fn evict(pool: &PoolInner, permit: Option<OwnedSemaphorePermit>) {
    let mut state = pool.state.lock().await;
    state.total -= 1;
    drop(state);
    if let Some(permit) = permit {
        permit.forget();
    }
    warn!("runner evicted from pool");
}

/// Read and discard lines on each unfinished stream until one ends with the
/// exit sentinel. Suffix matching, not equality: an interrupted partial line
/// can precede the sentinel with no newline between them.
async fn drain(runner: &mut Runner, stdout_done: bool, stderr_done: bool) -> bool {
    if !stdout_done {
        loop {
            match runner.next_stdout().await {
                Ok(Some(line)) => {
                    if line == framing::DEATH_LINE {
                        return false;
                    }
                    if line.ends_with(framing::EXIT_LINE) {
                        break;
                    }
                }
                _ => return false,
            }
        }
    }
    if !stderr_done {
        loop {
            match runner.next_stderr().await {
                Ok(Some(line)) => {
                    if line == framing::DEATH_LINE {
                        return false;
                    }
                    if line.ends_with(framing::EXIT_LINE) {
                        break;
                    }
                }
                _ => return false,
            }
        }
    }
    true
}
