//! Run supervisor.
//!
//! Owns one round controller for the lifetime of a run window: waits for the
//! wall-clock start time, watches the controller with a 1 s watchdog, stops
//! at the wall-clock stop time or on an external shutdown request, and gives
//! a crashed controller a single bounded window of automatic restarts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::collector::gate::{EventGate, Signal};
use crate::collector::node::NodeTarget;
use crate::collector::round::RoundController;

/// Identity and window of one supervised run. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    pub interval: Duration,
}

/// Supervisor restart tuning
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Delay before restarting a crashed controller
    pub restart_delay: Duration,

    /// Ceiling on the restart window measured from the first crash
    pub restart_window: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(60),
            restart_window: Duration::from_secs(600),
        }
    }
}

/// Restart bookkeeping shared between the watchdog, the supervisor loop and
/// the controller.
///
/// The window opens when the watchdog first sees the controller down and is
/// disarmed by the controller once its workers start cleanly.
pub struct RestartState {
    inner: Mutex<RestartInner>,
}

#[derive(Default)]
struct RestartInner {
    window_started: Option<DateTime<Utc>>,
    requested: bool,
}

impl RestartState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RestartInner::default()),
        }
    }

    /// Controller came up cleanly; close the restart window
    pub async fn disarm(&self) {
        let mut inner = self.inner.lock().await;
        inner.window_started = None;
        inner.requested = false;
    }

    /// Watchdog saw the controller down; open the window on first request
    pub async fn request(&self) {
        let mut inner = self.inner.lock().await;
        if inner.window_started.is_none() {
            inner.window_started = Some(Utc::now());
        }
        inner.requested = true;
    }

    pub async fn is_requested(&self) -> bool {
        self.inner.lock().await.requested
    }

    pub async fn window_started(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.window_started
    }
}

impl Default for RestartState {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the targets for one controller incarnation; called again on every
/// restart so each incarnation gets fresh connections
pub type TargetFactory = Arc<dyn Fn() -> Vec<NodeTarget> + Send + Sync>;

/// Supervises one run from start time to stop time
pub struct RunSupervisor {
    run: Run,
    options: SupervisorOptions,
    targets: TargetFactory,
    gate: EventGate,
    shutdown: Signal,
}

impl RunSupervisor {
    pub fn new(run: Run, options: SupervisorOptions, targets: TargetFactory) -> Self {
        let mut gate = EventGate::new();
        let shutdown = gate.signal();
        Self {
            run,
            options,
            targets,
            gate,
            shutdown,
        }
    }

    /// Signal handle that requests an orderly stop of the whole run
    pub fn shutdown_signal(&self) -> Signal {
        self.shutdown.clone()
    }

    /// Run until the window closes, the caller shuts down, or the restart
    /// budget is spent
    pub async fn run(self) {
        info!("Agent started for run {}.", self.run.run_id);
        self.wait_for_start().await;

        let restart = Arc::new(RestartState::new());

        loop {
            if self.shutdown.is_set() {
                break;
            }
            info!("Start time reached for run {}.", self.run.run_id);

            let finished = self.run_controller_once(restart.clone()).await;

            if !self.should_restart(&restart, finished).await {
                break;
            }
            warn!(
                "Waiting {:?} before restarting run {}.",
                self.options.restart_delay, self.run.run_id
            );
            tokio::time::sleep(self.options.restart_delay).await;
            warn!("Restarting collector for run {}.", self.run.run_id);
            self.shutdown.clear();
        }

        info!("Agent finished for run {}.", self.run.run_id);
    }

    /// Poll at 1 s until the start time is reached or shutdown is requested
    async fn wait_for_start(&self) {
        info!(
            "Waiting for collection start time: {}",
            self.run.start_time.to_rfc3339()
        );
        while Utc::now() < self.run.start_time && !self.shutdown.is_set() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// One controller incarnation: spawn it and its watchdog, wait for a
    /// stop condition, then join both. Returns whether the controller task
    /// had finished.
    async fn run_controller_once(&self, restart: Arc<RestartState>) -> bool {
        let controller =
            RoundController::new(&self.run.run_id, self.run.interval, restart.clone());
        let controller_stop = controller.stop_signal();
        let finished = Arc::new(AtomicBool::new(false));

        let targets = (self.targets)();
        let controller_task = {
            let finished = finished.clone();
            tokio::spawn(async move {
                controller.run(targets).await;
                finished.store(true, Ordering::SeqCst);
            })
        };

        let mut watchdog_gate = EventGate::new();
        let watchdog_stop = watchdog_gate.signal();
        let watchdog_task = tokio::spawn(watchdog(
            watchdog_gate,
            finished.clone(),
            restart,
            self.shutdown.clone(),
            self.run.stop_time,
        ));

        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.shutdown.is_set() || Utc::now() >= self.run.stop_time {
                warn!("Shutdown of collector run {}.", self.run.run_id);
                watchdog_stop.set();
                controller_stop.set();
                if let Err(e) = controller_task.await {
                    error!("collector task join failed: {}", e);
                }
                if let Err(e) = watchdog_task.await {
                    error!("watchdog join failed: {}", e);
                }
                break;
            }
        }

        finished.load(Ordering::SeqCst)
    }

    /// Restart only while requested, inside the bounded window, and with the
    /// controller confirmed down
    async fn should_restart(&self, restart: &RestartState, finished: bool) -> bool {
        if !restart.is_requested().await || !finished {
            return false;
        }
        let Some(window_started) = restart.window_started().await else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(self.options.restart_window) else {
            return false;
        };
        Utc::now() <= window_started + window
    }
}

/// 1 s liveness poll over the controller task.
///
/// On a dead controller: arm the restart window unless the run was
/// deliberately shut down after its window elapsed, then request supervisor
/// shutdown and back off before re-checking.
async fn watchdog(
    gate: EventGate,
    finished: Arc<AtomicBool>,
    restart: Arc<RestartState>,
    shutdown: Signal,
    stop_time: DateTime<Utc>,
) {
    info!("Collector watchdog started.");
    loop {
        if gate.wait_timeout(Duration::from_secs(1)).await != 0 {
            break;
        }
        if finished.load(Ordering::SeqCst) {
            warn!("Collector task is not alive. Restarting if shutdown not requested.");
            if !shutdown.is_set() || Utc::now() <= stop_time {
                restart.request().await;
            }
            shutdown.set();
            gate.wait_timeout(Duration::from_secs(5)).await;
        }
    }
}
