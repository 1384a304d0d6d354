//! Local-shell transport.
//!
//! Runs commands on the agent host itself through `sh -c`; satisfies the
//! same capability as the SSH transport, which keeps single-machine
//! collection and tests on the same code path as remote collection.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use crate::errors::CollectorError;
use crate::transport::{ConnectOptions, Connection, RetryBudget};

/// Command execution on the local host
pub struct LocalShellConnection {
    hostname: String,
    shell: String,
    options: ConnectOptions,
    budget: RetryBudget,
    active: AtomicBool,
}

impl LocalShellConnection {
    pub fn new(options: ConnectOptions) -> Self {
        Self::with_shell("/bin/sh", options)
    }

    pub fn with_shell(shell: impl Into<String>, options: ConnectOptions) -> Self {
        let budget = RetryBudget::new(options.attempts);
        Self {
            hostname: "localhost".to_string(),
            shell: shell.into(),
            options,
            budget,
            active: AtomicBool::new(false),
        }
    }

    /// Attempts left in the connect budget
    pub fn attempts_remaining(&self) -> u32 {
        self.budget.remaining()
    }

    async fn run_shell(&self, command: &str) -> Result<Vec<String>, CollectorError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CollectorError::CommandExecutionError {
                host: self.hostname.clone(),
                reason: format!("failed to spawn shell: {}", e),
            })?;

        if !output.status.success() {
            return Err(CollectorError::CommandExecutionError {
                host: self.hostname.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl Connection for LocalShellConnection {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn connect(&self) -> Result<(), CollectorError> {
        loop {
            if !self.budget.consume() {
                self.active.store(false, Ordering::SeqCst);
                return Err(CollectorError::TooManyRetries(self.hostname.clone()));
            }

            let probe =
                tokio::time::timeout(self.options.connect_timeout, self.run_shell("echo hello"))
                    .await;
            match probe {
                Ok(Ok(lines)) if lines == ["hello"] => {
                    self.budget.reset();
                    self.active.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(host = %self.hostname, "shell probe failed: {}", e);
                }
                _ => {
                    warn!(host = %self.hostname, "shell probe timed out or answered wrong");
                }
            }
        }
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn execute(&self, command: &str) -> Result<Vec<String>, CollectorError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(CollectorError::CommandExecutionError {
                host: self.hostname.clone(),
                reason: "no active session".to_string(),
            });
        }
        self.run_shell(command).await
    }

    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_probe_and_execute() {
        let conn = LocalShellConnection::new(ConnectOptions::default());
        conn.connect().await.unwrap();
        assert!(conn.is_active().await);
        assert!(conn.test_connection().await);

        let lines = conn.execute("printf 'a\\nb\\n'").await.unwrap();
        assert_eq!(lines, vec!["a", "b"]);

        conn.close().await;
        assert!(!conn.is_active().await);
        assert!(conn.execute("echo hi").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_exhausts_budget_after_exactly_four_attempts() {
        let conn =
            LocalShellConnection::with_shell("/nonexistent/shell", ConnectOptions::default());
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, CollectorError::TooManyRetries(_)));
        assert_eq!(conn.attempts_remaining(), 0);

        // Budget stays exhausted until a connect succeeds
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, CollectorError::TooManyRetries(_)));
    }
}
