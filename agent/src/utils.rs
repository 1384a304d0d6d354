//! Utility functions

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Version information for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

const RUN_ID_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Create a fresh run id for a collection run
pub fn create_run_id() -> String {
    let uid = uuid::Uuid::new_v4().to_string();
    format!(
        "fleetprobe_{}_{}",
        &uid[..3],
        Utc::now().format(RUN_ID_TIME_FORMAT)
    )
}

/// Suffix a client-supplied run id with the current UTC timestamp
pub fn suffix_run_id(id: &str) -> String {
    format!("{}_{}", id, Utc::now().format(RUN_ID_TIME_FORMAT))
}

/// Derive a per-node run id from the run id, unique per worker
pub fn create_node_run_id(run_id: &str) -> String {
    let uid = uuid::Uuid::new_v4().to_string();
    format!("{}_{}", run_id, &uid[..8])
}
