//! Run registry.
//!
//! Starts, stops and tracks supervised runs on behalf of the control-plane
//! API, and reads persisted results back from the data directory.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::collector::gate::Signal;
use crate::collector::node::NodeTarget;
use crate::collector::supervisor::{Run, RunSupervisor, SupervisorOptions, TargetFactory};
use crate::errors::CollectorError;
use crate::sink::elastic::ElasticStore;
use crate::sink::RecordSink;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::transport::ssh::SshConnection;
use crate::transport::{ConnectOptions, Connection};

struct RunEntry {
    run_id: String,
    shutdown: Signal,
    task: JoinHandle<()>,
}

/// Tracks running collection runs and their persisted output
pub struct RunRegistry {
    layout: StorageLayout,
    settings: Settings,
    runs: Mutex<Vec<RunEntry>>,
}

impl RunRegistry {
    pub fn new(layout: StorageLayout, settings: Settings) -> Self {
        Self {
            layout,
            settings,
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Start a supervised run; deltas are seconds relative to now
    pub async fn start_run(
        &self,
        start_delta: u64,
        stop_delta: u64,
        interval: u64,
        run_id: String,
    ) -> Result<(), CollectorError> {
        let start_time = Utc::now() + chrono::Duration::seconds(start_delta as i64);
        let run = Run {
            run_id: run_id.clone(),
            start_time,
            stop_time: start_time + chrono::Duration::seconds(stop_delta as i64),
            interval: Duration::from_secs(interval),
        };

        let options = SupervisorOptions {
            restart_delay: self.settings.collect.restart_delay(),
            restart_window: self.settings.collect.restart_window(),
        };
        let supervisor =
            RunSupervisor::new(run, options, target_factory(&self.settings, &self.layout));
        let shutdown = supervisor.shutdown_signal();

        info!("Starting collection run {}.", run_id);
        let task = tokio::spawn(supervisor.run());

        self.runs.lock().await.push(RunEntry {
            run_id,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop the named run; false when no such run exists
    pub async fn stop_run(&self, run_id: &str) -> bool {
        let mut runs = self.runs.lock().await;
        let Some(idx) = runs.iter().position(|entry| entry.run_id == run_id) else {
            return false;
        };
        let entry = runs.remove(idx);
        info!("Stopping collection run {}.", entry.run_id);
        entry.shutdown.set();
        // The supervised task drains on its own; the handle is dropped
        drop(entry.task);
        true
    }

    /// Stop every run and wait for the supervisors to drain
    pub async fn stop_all(&self) {
        let entries: Vec<RunEntry> = self.runs.lock().await.drain(..).collect();
        for entry in &entries {
            entry.shutdown.set();
        }
        for entry in entries {
            if let Err(e) = entry.task.await {
                error!("run {} join failed: {}", entry.run_id, e);
            }
        }
    }

    /// Names of persisted collection runs
    pub async fn collection_names(&self) -> Result<Vec<String>, CollectorError> {
        self.layout.data_dir().list_dir_names().await
    }

    /// Persisted records for one host of one run, parsed per line
    pub async fn collection_results(
        &self,
        run_id: &str,
        host: &str,
    ) -> Result<Vec<serde_json::Value>, CollectorError> {
        let file = self.layout.run_dir(run_id).file(&format!("{}.json", host));
        let lines = file.read_lines().await?;
        lines
            .iter()
            .map(|line| serde_json::from_str(line).map_err(CollectorError::from))
            .collect()
    }
}

/// Build the per-incarnation targets from the configured hosts.
///
/// Called once per controller incarnation so every (re)start gets fresh
/// connections.
pub fn target_factory(settings: &Settings, layout: &StorageLayout) -> TargetFactory {
    let settings = settings.clone();
    let layout = layout.clone();

    Arc::new(move || {
        let options = ConnectOptions {
            attempts: settings.collect.connect_attempts,
            connect_timeout: settings.collect.connect_timeout(),
        };

        let store: Option<Arc<dyn RecordSink>> = settings.store.as_ref().and_then(|s| {
            match ElasticStore::new(s) {
                Ok(store) => Some(Arc::new(store) as Arc<dyn RecordSink>),
                Err(e) => {
                    warn!("metrics store disabled: {}", e);
                    None
                }
            }
        });

        settings
            .hosts
            .iter()
            .map(|host| NodeTarget {
                connection: Arc::new(SshConnection::new(host, options.clone()))
                    as Arc<dyn Connection>,
                data_dir: layout.data_dir(),
                store: store.clone(),
            })
            .collect()
    })
}
