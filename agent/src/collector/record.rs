//! Raw snapshots and derived records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw command output captured during one collection cycle.
///
/// Owned by the worker for the duration of the cycle, never shared.
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: Vec<String>,
    pub memory: Vec<String>,
    pub processes: Vec<String>,
}

/// Cumulative per-core counters in /proc/stat column order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
}

/// One core's counters plus the derived utilization percentage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    #[serde(flatten)]
    pub counters: CpuCounters,
    pub utilization: f64,
}

/// One fully derived sample for one host.
///
/// Serialized as a single self-contained JSON line; the round trip through
/// JSON is lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    pub timestamp: String,
    pub run_id: String,
    pub cpus: BTreeMap<String, CpuReading>,
    pub memory: BTreeMap<String, String>,
    pub processes: Vec<BTreeMap<String, String>>,
}

/// Parse /proc/meminfo-style lines into a key/value map.
///
/// Lines with fewer than two tokens are skipped.
pub fn parse_memory(lines: &[String]) -> BTreeMap<String, String> {
    let mut memory = BTreeMap::new();
    for line in lines {
        let mut tokens = line.split_whitespace();
        if let (Some(key), Some(value)) = (tokens.next(), tokens.next()) {
            memory.insert(key.trim_end_matches(':').to_string(), value.to_string());
        }
    }
    memory
}

/// Parse a process table (`top -b -n 1` output) into per-process maps.
///
/// Field names come from the header row, located as the first line whose
/// first token is `PID`. The trailing `command` field greedily absorbs the
/// rest of the row so commands containing whitespace survive. Rows with
/// fewer tokens than the header are skipped.
pub fn parse_processes(lines: &[String]) -> Vec<BTreeMap<String, String>> {
    let header_idx = lines.iter().position(|line| {
        line.split_whitespace()
            .next()
            .is_some_and(|tok| tok.eq_ignore_ascii_case("pid"))
    });
    let Some(header_idx) = header_idx else {
        return Vec::new();
    };

    let fields: Vec<String> = lines[header_idx]
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();

    let mut processes = Vec::new();
    for row in &lines[header_idx + 1..] {
        let tokens: Vec<&str> = row.split_whitespace().collect();
        if tokens.len() < fields.len() {
            continue;
        }

        let mut process = BTreeMap::new();
        for (i, field) in fields.iter().enumerate() {
            if field == "command" {
                process.insert(field.clone(), tokens[i..].join(" "));
            } else {
                process.insert(field.clone(), tokens[i].to_string());
            }
        }
        processes.push(process);
    }
    processes
}
