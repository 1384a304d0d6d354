//! SSH transport over the system ssh client.
//!
//! A connect opens a control-master session that later `execute` calls
//! multiplex over, so authentication happens once per connect rather than
//! once per command.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::CollectorError;
use crate::storage::settings::HostSettings;
use crate::transport::{ConnectOptions, Connection, RetryBudget};

/// SSH connection to one monitored host
pub struct SshConnection {
    hostname: String,
    port: u16,
    username: String,
    password: Option<SecretString>,
    key_path: Option<PathBuf>,
    control_path: PathBuf,
    options: ConnectOptions,
    budget: RetryBudget,
    connected: AtomicBool,
}

impl SshConnection {
    pub fn new(host: &HostSettings, options: ConnectOptions) -> Self {
        let uid = uuid::Uuid::new_v4().to_string();
        let control_path = std::env::temp_dir().join(format!("fp-{}.sock", &uid[..8]));
        let budget = RetryBudget::new(options.attempts);

        Self {
            hostname: host.hostname.clone(),
            port: host.port,
            username: host.username.clone(),
            password: host.password.clone(),
            key_path: host.key_path.clone(),
            control_path,
            options,
            budget,
            connected: AtomicBool::new(false),
        }
    }

    /// Base ssh invocation reusing the control master
    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-l")
            .arg(&self.username)
            .arg(&self.hostname);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Open the control-master session, authenticating once
    async fn open_master(&self) -> Result<(), CollectorError> {
        let mut cmd = match &self.password {
            Some(password) => {
                // sshpass reads the password from SSHPASS; it never hits argv
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e")
                    .env("SSHPASS", password.expose_secret())
                    .arg("ssh");
                cmd
            }
            None => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        };

        cmd.arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.options.connect_timeout.as_secs()
            ))
            .arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg("ControlPersist=yes");

        if let Some(key) = &self.key_path {
            cmd.arg("-i").arg(key);
        }

        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-l")
            .arg(&self.username)
            .arg("-N")
            .arg("-f")
            .arg(&self.hostname)
            .stdin(Stdio::null());

        let output = cmd.output().await.map_err(|e| {
            CollectorError::TransportError {
                host: self.hostname.clone(),
                reason: format!("failed to spawn ssh: {}", e),
            }
        })?;

        if !output.status.success() {
            return Err(CollectorError::TransportError {
                host: self.hostname.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    /// One control-master operation: check or exit
    async fn master_op(&self, op: &str) -> bool {
        let result = Command::new("ssh")
            .arg("-O")
            .arg(op)
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-l")
            .arg(&self.username)
            .arg(&self.hostname)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        matches!(result, Ok(status) if status.success())
    }
}

#[async_trait]
impl Connection for SshConnection {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn connect(&self) -> Result<(), CollectorError> {
        loop {
            if !self.budget.consume() {
                return Err(CollectorError::TooManyRetries(self.hostname.clone()));
            }

            let attempt =
                tokio::time::timeout(self.options.connect_timeout, self.open_master()).await;
            match attempt {
                Ok(Ok(())) => {
                    self.connected.store(true, Ordering::SeqCst);
                    if self.test_connection().await {
                        self.budget.reset();
                        debug!(host = %self.hostname, "ssh session established");
                        return Ok(());
                    }
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(Err(e)) => {
                    warn!(host = %self.hostname, "connect attempt failed: {}", e);
                }
                Err(_) => {
                    warn!(host = %self.hostname, "connect attempt timed out");
                }
            }
        }
    }

    async fn is_active(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.master_op("check").await
    }

    async fn execute(&self, command: &str) -> Result<Vec<String>, CollectorError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CollectorError::CommandExecutionError {
                host: self.hostname.clone(),
                reason: "no active session".to_string(),
            });
        }

        let output = self
            .ssh_command()
            .arg("--")
            .arg(command)
            .output()
            .await
            .map_err(|e| CollectorError::CommandExecutionError {
                host: self.hostname.clone(),
                reason: format!("failed to spawn ssh: {}", e),
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

    async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.master_op("exit").await;
        }
    }
}
