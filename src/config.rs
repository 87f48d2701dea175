//! Pool configuration.

use std::time::Duration;

/// Upper bound on the number of shells a single `start`/`ensure` may request.
pub const DEFAULT_MAX_SHELLS: usize = 1000;

/// Configuration applied when constructing a [`ShellPool`](crate::ShellPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Ceiling for requested shell counts.
    ///
    /// `start(n)` and `ensure(n)` reject `n >= max_shells` with
    /// [`StartError::Insane`](crate::StartError::Insane).
    /// Default: 1000.
    pub max_shells: usize,

    /// Emit `tracing` debug events for command dispatch, PID capture, exit
    /// statuses, and reclaim decisions.
    ///
    /// Default: false.
    pub debug: bool,

    /// How long the recovery drain may wait for an end sentinel after an
    /// aborted command before the runner is given up and evicted.
    ///
    /// Default: 5 seconds.
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_shells: DEFAULT_MAX_SHELLS,
            debug: false,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Set the shell-count ceiling.
    pub fn with_max_shells(mut self, max: usize) -> Self {
        self.max_shells = max;
        self
    }

    /// Enable or disable debug trace events.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the recovery-drain bound.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_shells, DEFAULT_MAX_SHELLS);
        assert!(!config.debug);
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn combinators() {
        let config = PoolConfig::default()
            .with_max_shells(4)
            .with_debug(true)
            .with_drain_timeout(Duration::from_millis(250));
        assert_eq!(config.max_shells, 4);
        assert!(config.debug);
        assert_eq!(config.drain_timeout, Duration::from_millis(250));
    }
}
