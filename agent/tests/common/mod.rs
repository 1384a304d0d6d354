//! Shared test doubles for collector integration tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetprobe::errors::CollectorError;
use fleetprobe::transport::Connection;

/// How a [`MockConnection`] behaves during a collection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Answer every command
    Healthy,
    /// Fail every command with a transport-class error (worker reconnects)
    FailCommands,
    /// Fail every command with an unexpected error (worker dies)
    FailUnhandled,
}

/// Scripted in-memory connection.
///
/// Serves believable /proc/stat, /proc/meminfo and top output with counters
/// that advance every cycle. An optional per-cycle delay on the cpu command
/// simulates a slow host.
pub struct MockConnection {
    hostname: String,
    behavior: MockBehavior,
    cycle_delays: Vec<Duration>,
    active: AtomicBool,
    tick: AtomicUsize,
    pub connect_calls: Arc<AtomicUsize>,
    pub markers: Arc<Mutex<Vec<String>>>,
    connect_hold: Duration,
}

impl MockConnection {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            behavior: MockBehavior::Healthy,
            cycle_delays: Vec::new(),
            active: AtomicBool::new(false),
            tick: AtomicUsize::new(0),
            connect_calls: Arc::new(AtomicUsize::new(0)),
            markers: Arc::new(Mutex::new(Vec::new())),
            connect_hold: Duration::ZERO,
        }
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Delay applied to the cpu command of cycle N; later cycles reuse the
    /// last entry
    pub fn with_cycle_delays(mut self, delays: Vec<Duration>) -> Self {
        self.cycle_delays = delays;
        self
    }

    /// Hold the connection open for this long inside `connect`, bracketed by
    /// begin/end markers
    pub fn with_connect_hold(mut self, hold: Duration) -> Self {
        self.connect_hold = hold;
        self
    }

    /// Record connect markers into a list shared with other connections
    pub fn with_markers(mut self, markers: Arc<Mutex<Vec<String>>>) -> Self {
        self.markers = markers;
        self
    }

    /// Completed sampling cycles (cpu command invocations)
    pub fn cycles(&self) -> usize {
        self.tick.load(Ordering::SeqCst)
    }

    fn stat_lines(&self, tick: usize) -> Vec<String> {
        let t = tick as u64;
        vec![
            format!("cpu  {} 0 {} {} 0 0 0 0 0 0", 20 * t, 10 * t, 150 * t),
            format!("cpu0 {} 0 {} {} 0 0 0 0 0 0", 20 * t, 10 * t, 150 * t),
        ]
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn connect(&self) -> Result<(), CollectorError> {
        let call = self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connect_hold.is_zero() {
            self.markers
                .lock()
                .unwrap()
                .push(format!("begin-{}-{}", self.hostname, call));
            tokio::time::sleep(self.connect_hold).await;
            self.markers
                .lock()
                .unwrap()
                .push(format!("end-{}-{}", self.hostname, call));
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn execute(&self, command: &str) -> Result<Vec<String>, CollectorError> {
        if command == "echo hello" {
            return Ok(vec!["hello".to_string()]);
        }

        match self.behavior {
            MockBehavior::FailCommands => {
                return Err(CollectorError::CommandExecutionError {
                    host: self.hostname.clone(),
                    reason: "simulated command failure".to_string(),
                })
            }
            MockBehavior::FailUnhandled => {
                return Err(CollectorError::Internal("simulated crash".to_string()))
            }
            MockBehavior::Healthy => {}
        }

        if command.contains("/proc/stat") {
            let tick = self.tick.fetch_add(1, Ordering::SeqCst);
            if !self.cycle_delays.is_empty() {
                let delay = self.cycle_delays[tick.min(self.cycle_delays.len() - 1)];
                tokio::time::sleep(delay).await;
            }
            Ok(self.stat_lines(tick + 1))
        } else if command.contains("/proc/meminfo") {
            Ok(vec![
                "MemTotal:       16384256 kB".to_string(),
                "MemFree:         8123456 kB".to_string(),
            ])
        } else {
            Ok(vec![
                "Tasks: 2 total".to_string(),
                "  PID USER %CPU COMMAND".to_string(),
                "    1 root  0.0 /sbin/init".to_string(),
            ])
        }
    }

    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
