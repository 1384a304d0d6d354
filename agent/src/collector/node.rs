//! Per-host collection worker.
//!
//! One long-lived task per monitored host. The worker owns its connection
//! and derivation state, blocks on its event gate between rounds, and
//! isolates its own failures: transport trouble triggers a reconnect,
//! a bad sample drops the cycle, anything unexpected terminates this worker
//! only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::collector::deriver::MetricDeriver;
use crate::collector::gate::{EventGate, Signal};
use crate::collector::record::RawSnapshot;
use crate::collector::round::RoundContext;
use crate::errors::CollectorError;
use crate::filesys::dir::Dir;
use crate::sink::file::FileSink;
use crate::sink::RecordSink;
use crate::transport::Connection;
use crate::utils::create_node_run_id;

const CPU_COMMAND: &str = "cat /proc/stat";
const MEM_COMMAND: &str = "cat /proc/meminfo";
const PROCESS_COMMAND: &str = "top -b -n 1";

/// Everything needed to collect from one host
pub struct NodeTarget {
    pub connection: Arc<dyn Connection>,
    pub data_dir: Dir,
    pub store: Option<Arc<dyn RecordSink>>,
}

/// Worker state visible to the round controller
#[derive(Debug, Default)]
pub struct WorkerShared {
    pub collecting: AtomicBool,
    pub success: AtomicBool,
}

impl WorkerShared {
    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }
}

/// Controller-side handle to a spawned worker
pub struct WorkerHandle {
    pub hostname: String,
    pub node_run_id: String,
    pub connection: Arc<dyn Connection>,
    pub shared: Arc<WorkerShared>,
    pub stop: Signal,
    pub collect: Signal,
    pub task: JoinHandle<()>,
}

struct NodeWorker {
    connection: Arc<dyn Connection>,
    run_dir: Dir,
    store: Option<Arc<dyn RecordSink>>,
    sink: FileSink,
    deriver: MetricDeriver,
    node_run_id: String,
    ctx: Arc<RoundContext>,
    shared: Arc<WorkerShared>,
    gate: EventGate,
    stop: Signal,
    collect: Signal,
}

/// Spawn the worker task for one target
pub fn spawn_worker(run_id: &str, target: NodeTarget, ctx: Arc<RoundContext>) -> WorkerHandle {
    let mut gate = EventGate::new();
    let stop = gate.signal();
    let collect = gate.signal();
    let shared = Arc::new(WorkerShared::default());

    let hostname = target.connection.hostname().to_string();
    let node_run_id = create_node_run_id(run_id);
    let run_dir = target.data_dir.subdir(&node_run_id);
    let sink = FileSink::new(&run_dir, &hostname);

    let worker = NodeWorker {
        connection: target.connection.clone(),
        run_dir,
        store: target.store,
        sink,
        deriver: MetricDeriver::new(),
        node_run_id: node_run_id.clone(),
        ctx,
        shared: shared.clone(),
        gate,
        stop: stop.clone(),
        collect: collect.clone(),
    };

    let task = tokio::spawn(worker.run());

    WorkerHandle {
        hostname,
        node_run_id,
        connection: target.connection,
        shared,
        stop,
        collect,
        task,
    }
}

impl NodeWorker {
    fn hostname(&self) -> &str {
        self.connection.hostname()
    }

    /// Worker lifecycle: connect, probe, then wait-and-collect until stopped
    async fn run(mut self) {
        info!("Started worker for: {}", self.hostname());

        if let Err(e) = self.run_dir.create().await {
            error!("{} failed to create data directory: {}", self.hostname(), e);
        }

        self.connect_to_node().await;
        if self.connection.test_connection().await {
            if let Err(e) = self.wait_and_handle_events().await {
                error!("{} worker terminating: {}", self.hostname(), e);
            }
        } else {
            warn!(
                "{} liveness probe failed, worker will not collect",
                self.hostname()
            );
        }

        info!("{} finished.", self.hostname());
        self.stop.set();
    }

    /// Connect under the controller-wide reconnect lock.
    ///
    /// At most one worker authenticates against the fleet at a time; the
    /// lock is released whether the connect succeeds or fails. Failure stops
    /// this worker.
    async fn connect_to_node(&self) {
        let _guard = self.ctx.reconnect_lock.lock().await;
        if let Err(e) = self.connection.connect().await {
            error!("{} connect failed: {}", self.hostname(), e);
            self.stop.set();
        }
    }

    /// Block on the gate; dispatch stop and collect signals
    async fn wait_and_handle_events(&mut self) -> Result<(), CollectorError> {
        loop {
            self.gate.wait().await;
            if self.stop.is_set() {
                break;
            }
            if self.collect.is_set() {
                self.collect.clear();
                self.handle_collect_event().await?;
            }
        }
        Ok(())
    }

    /// One collection cycle, with per-failure-class handling
    async fn handle_collect_event(&mut self) -> Result<(), CollectorError> {
        self.shared.collecting.store(true, Ordering::SeqCst);
        info!("{} started collecting.", self.hostname());

        let success = match self.try_collect().await {
            Ok(()) => true,
            Err(
                e @ (CollectorError::TransportError { .. }
                | CollectorError::CommandExecutionError { .. }),
            ) => {
                error!("{} collecting failed: {}", self.hostname(), e);
                self.connect_to_node().await;
                false
            }
            Err(e @ CollectorError::CalculationError(_)) => {
                error!("{} cycle dropped: {}", self.hostname(), e);
                false
            }
            Err(e) => {
                self.shared.success.store(false, Ordering::SeqCst);
                self.shared.collecting.store(false, Ordering::SeqCst);
                return Err(CollectorError::UnhandledCollectionError {
                    host: self.hostname().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        self.shared.success.store(success, Ordering::SeqCst);
        self.shared.collecting.store(false, Ordering::SeqCst);
        info!(
            "{} finished collecting, success: {}.",
            self.hostname(),
            success
        );
        self.node_finished().await;
        Ok(())
    }

    /// Sample, derive, persist
    async fn try_collect(&mut self) -> Result<(), CollectorError> {
        let cpu = self.connection.execute(CPU_COMMAND).await?;
        let memory = self.connection.execute(MEM_COMMAND).await?;
        let processes = self.connection.execute(PROCESS_COMMAND).await?;

        let snapshot = RawSnapshot {
            timestamp: Utc::now(),
            cpu,
            memory,
            processes,
        };
        let record = self.deriver.derive(&snapshot, &self.node_run_id)?;

        self.sink.append(&record).await?;
        if let Some(store) = &self.store {
            // Upload is best-effort; the file sink is the durable copy
            if let Err(e) = store.append(&record).await {
                warn!("{} upload failed: {}", self.hostname(), e);
            }
        }
        Ok(())
    }

    /// Report cycle completion; the last worker of a round logs the elapsed
    /// time
    async fn node_finished(&self) {
        if self.ctx.all_idle().await {
            if let Some(elapsed) = self.ctx.round_elapsed().await {
                info!("Time elapsed during collection: {:?}", elapsed);
            }
        }
    }
}
