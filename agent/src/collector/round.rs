//! Round controller.
//!
//! Owns the worker set for one run. On a fixed cadence it triggers a
//! collection round across all workers, skipping the trigger when a prior
//! round is still in flight, and aborts the whole loop if any worker task
//! has died. Shutdown signals every worker, closes every connection, then
//! joins every task, with one extra post-stop trigger so data already in
//! flight is not lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::collector::gate::{EventGate, Signal};
use crate::collector::node::{spawn_worker, NodeTarget, WorkerHandle, WorkerShared};
use crate::collector::supervisor::RestartState;
use crate::errors::CollectorError;

/// State shared between the controller and its workers.
///
/// The reconnect lock is the only resource mutually exclusive across
/// workers; everything else here is read-mostly round bookkeeping.
pub struct RoundContext {
    pub reconnect_lock: Mutex<()>,
    peers: RwLock<Vec<Arc<WorkerShared>>>,
    round_started: Mutex<Option<Instant>>,
}

impl RoundContext {
    pub fn new() -> Self {
        Self {
            reconnect_lock: Mutex::new(()),
            peers: RwLock::new(Vec::new()),
            round_started: Mutex::new(None),
        }
    }

    async fn register(&self, peers: Vec<Arc<WorkerShared>>) {
        *self.peers.write().await = peers;
    }

    /// True when no registered worker is mid-cycle
    pub async fn all_idle(&self) -> bool {
        self.peers
            .read()
            .await
            .iter()
            .all(|peer| !peer.is_collecting())
    }

    async fn mark_round_start(&self) {
        *self.round_started.lock().await = Some(Instant::now());
    }

    /// Time since the current round was triggered
    pub async fn round_elapsed(&self) -> Option<Duration> {
        let started = *self.round_started.lock().await;
        started.map(|start| start.elapsed())
    }
}

impl Default for RoundContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives collection rounds for one run
pub struct RoundController {
    run_id: String,
    interval: Duration,
    ctx: Arc<RoundContext>,
    workers: Vec<WorkerHandle>,
    gate: EventGate,
    stop: Signal,
    restart: Arc<RestartState>,
    skipped_rounds: u64,
}

impl RoundController {
    pub fn new(
        run_id: impl Into<String>,
        interval: Duration,
        restart: Arc<RestartState>,
    ) -> Self {
        let mut gate = EventGate::new();
        let stop = gate.signal();
        Self {
            run_id: run_id.into(),
            interval,
            ctx: Arc::new(RoundContext::new()),
            workers: Vec::new(),
            gate,
            stop,
            restart,
            skipped_rounds: 0,
        }
    }

    /// Signal handle that stops the round loop
    pub fn stop_signal(&self) -> Signal {
        self.stop.clone()
    }

    pub fn context(&self) -> Arc<RoundContext> {
        self.ctx.clone()
    }

    /// Run rounds until stopped; any unhandled failure is terminal here
    pub async fn run(mut self, targets: Vec<NodeTarget>) {
        info!("Main collector started for run {}.", self.run_id);
        if let Err(e) = self.main_logic(targets).await {
            warn!("Collector ran into an issue, shutting down: {}", e);
        }
        info!("Main collector finished for run {}.", self.run_id);
    }

    async fn main_logic(&mut self, targets: Vec<NodeTarget>) -> Result<(), CollectorError> {
        self.start_workers(targets).await?;
        self.restart.disarm().await;

        // First collection fires immediately, then once per interval
        self.trigger_collect().await;
        loop {
            let fired = self.gate.wait_timeout(self.interval).await;
            if fired != 0 {
                break;
            }
            if self.workers.is_empty() {
                break;
            }
            self.trigger_collect().await;
        }

        // One more collection after the stop signal so a round already in
        // flight gets flushed
        self.trigger_collect().await;
        tokio::time::sleep(self.interval).await;
        self.stop_workers().await;
        Ok(())
    }

    async fn start_workers(&mut self, targets: Vec<NodeTarget>) -> Result<(), CollectorError> {
        info!("Creating node workers...");
        if targets.is_empty() {
            return Err(CollectorError::NoNodesConfigured);
        }

        for target in targets {
            self.workers
                .push(spawn_worker(&self.run_id, target, self.ctx.clone()));
        }

        let peers = self.workers.iter().map(|w| w.shared.clone()).collect();
        self.ctx.register(peers).await;
        Ok(())
    }

    /// Distribute one collect trigger to all workers.
    ///
    /// A dead worker aborts the round loop for every worker; a round still
    /// in flight sheds this trigger instead of queueing it.
    async fn trigger_collect(&mut self) {
        if !self.workers_alive() {
            warn!("A node worker terminated unexpectedly, stopping collection.");
            self.stop.set();
        }

        if !self.ctx.all_idle().await {
            self.skipped_rounds += 1;
            warn!(
                "New collect ordered before last one was finished, skipping ({} skipped).",
                self.skipped_rounds
            );
            return;
        }

        info!("Triggering new collection for all nodes.");
        self.ctx.mark_round_start().await;
        for worker in &self.workers {
            worker.collect.set();
        }
    }

    fn workers_alive(&self) -> bool {
        self.workers.iter().all(|w| !w.task.is_finished())
    }

    /// Signal stop to every worker, close every connection, join every task
    async fn stop_workers(&mut self) {
        info!("Stopping node workers.");
        for worker in &self.workers {
            worker.stop.set();
        }
        for worker in &self.workers {
            worker.connection.close().await;
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.task.await {
                error!("{} worker join failed: {}", worker.hostname, e);
            }
        }
        info!("All node workers stopped.");
    }
}
