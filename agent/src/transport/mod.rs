//! Remote command execution

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::CollectorError;

pub mod local;
pub mod ssh;

/// Command-execution capability for one host.
///
/// Implementations own their session state, the connect retry budget, and
/// teardown. `is_active` reflects transport-level state only, never the
/// outcome of individual commands.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Host this connection targets
    fn hostname(&self) -> &str;

    /// Open a session, retrying up to the connect budget.
    ///
    /// A successful connect resets the budget to its maximum; an exhausted
    /// budget fails with `TooManyRetries` until a later connect succeeds.
    async fn connect(&self) -> Result<(), CollectorError>;

    /// Whether a session is currently open
    async fn is_active(&self) -> bool;

    /// Run a command on the host, returning its stdout lines
    async fn execute(&self, command: &str) -> Result<Vec<String>, CollectorError>;

    /// Tear the session down
    async fn close(&self);

    /// Round-trip liveness probe
    async fn test_connection(&self) -> bool {
        matches!(self.execute("echo hello").await, Ok(lines) if lines == ["hello"])
    }
}

/// Connect tuning shared by transport implementations
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Attempts before `connect()` gives up
    pub attempts: u32,

    /// Per-attempt timeout
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            attempts: 4,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Connect attempt budget.
///
/// Consumed one attempt at a time; replenished only by `reset` after a
/// successful connect.
#[derive(Debug)]
pub struct RetryBudget {
    max: u32,
    left: AtomicU32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            left: AtomicU32::new(max),
        }
    }

    /// Take one attempt; returns false when the budget is exhausted
    pub fn consume(&self) -> bool {
        self.left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }

    /// Restore the budget to its maximum
    pub fn reset(&self) {
        self.left.store(self.max, Ordering::SeqCst);
    }

    /// Attempts still available
    pub fn remaining(&self) -> u32 {
        self.left.load(Ordering::SeqCst)
    }
}
