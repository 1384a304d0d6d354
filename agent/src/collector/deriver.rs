//! Stateful utilization derivation.
//!
//! Turns successive raw counter snapshots into utilization-augmented
//! records. One baseline of previous counters is kept per discovered core;
//! the core set is discovered from the first snapshot and assumed stable for
//! the run.

use std::collections::HashMap;

use crate::collector::record::{
    parse_memory, parse_processes, CpuCounters, CpuReading, DerivedRecord, RawSnapshot,
};
use crate::errors::CollectorError;

/// Per-host metric derivation state
pub struct MetricDeriver {
    baseline: Option<HashMap<String, CpuCounters>>,
}

impl MetricDeriver {
    pub fn new() -> Self {
        Self { baseline: None }
    }

    /// Derive one record from a snapshot, advancing the baseline.
    ///
    /// The first call seeds a zeroed baseline for every discovered core, so
    /// the first record's utilization is computed against all-zero counters.
    /// That matches the long-standing collector behavior and is documented
    /// rather than special-cased; consumers ignore the first sample when it
    /// matters.
    pub fn derive(
        &mut self,
        snapshot: &RawSnapshot,
        node_run_id: &str,
    ) -> Result<DerivedRecord, CollectorError> {
        let current = parse_cpu_lines(&snapshot.cpu)?;

        let baseline = self.baseline.get_or_insert_with(|| {
            current
                .iter()
                .map(|(name, _)| (name.clone(), CpuCounters::default()))
                .collect()
        });

        let mut cpus = std::collections::BTreeMap::new();
        for (name, prev) in baseline.iter() {
            let counters = current
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| *c)
                .ok_or_else(|| {
                    CollectorError::CalculationError(format!(
                        "core {} missing from snapshot",
                        name
                    ))
                })?;
            let utilization = utilization_percent(&counters, prev)?;
            cpus.insert(
                name.clone(),
                CpuReading {
                    counters,
                    utilization,
                },
            );
        }

        // Replace the baseline wholesale with the just-observed raw counters
        *baseline = current.into_iter().collect();

        Ok(DerivedRecord {
            timestamp: snapshot.timestamp.to_rfc3339(),
            run_id: node_run_id.to_string(),
            cpus,
            memory: parse_memory(&snapshot.memory),
            processes: parse_processes(&snapshot.processes),
        })
    }
}

impl Default for MetricDeriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the cpu lines of /proc/stat into (core name, counters) pairs
fn parse_cpu_lines(lines: &[String]) -> Result<Vec<(String, CpuCounters)>, CollectorError> {
    let mut cores = Vec::new();
    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(name) = tokens.first() else {
            continue;
        };
        if !name.starts_with("cpu") {
            continue;
        }
        if tokens.len() < 10 {
            return Err(CollectorError::CalculationError(format!(
                "short cpu line for {}",
                name
            )));
        }

        let mut values = [0u64; 9];
        for (slot, token) in values.iter_mut().zip(&tokens[1..10]) {
            *slot = token.parse().map_err(|_| {
                CollectorError::CalculationError(format!(
                    "non-numeric counter {:?} for {}",
                    token, name
                ))
            })?;
        }

        let [user, nice, system, idle, iowait, irq, softirq, steal, guest] = values;
        cores.push((
            name.to_string(),
            CpuCounters {
                user,
                nice,
                system,
                idle,
                iowait,
                irq,
                softirq,
                steal,
                guest,
            },
        ));
    }
    Ok(cores)
}

/// Utilization between two counter readings.
///
///     prev_idle = prev.idle + prev.iowait        idle = idle + iowait
///     prev_busy = user+nice+system+irq+softirq+steal (prev), busy analogous
///     total_delta = (idle + busy) - (prev_idle + prev_busy)
///     utilization = (total_delta - idle_delta) / total_delta * 100
fn utilization_percent(cur: &CpuCounters, prev: &CpuCounters) -> Result<f64, CollectorError> {
    let prev_idle = prev.idle + prev.iowait;
    let idle = cur.idle + cur.iowait;

    let prev_busy = prev.user + prev.nice + prev.system + prev.irq + prev.softirq + prev.steal;
    let busy = cur.user + cur.nice + cur.system + cur.irq + cur.softirq + cur.steal;

    let total_delta = (idle + busy) as i64 - (prev_idle + prev_busy) as i64;
    let idle_delta = idle as i64 - prev_idle as i64;

    if total_delta == 0 {
        return Err(CollectorError::CalculationError(
            "zero total counter delta".to_string(),
        ));
    }

    Ok((total_delta - idle_delta) as f64 / total_delta as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(cpu: &[&str]) -> RawSnapshot {
        RawSnapshot {
            timestamp: Utc::now(),
            cpu: cpu.iter().map(|s| s.to_string()).collect(),
            memory: vec!["MemTotal: 1024 kB".to_string()],
            processes: Vec::new(),
        }
    }

    fn counters(user: u64, system: u64, idle: u64) -> CpuCounters {
        CpuCounters {
            user,
            nice: 0,
            system,
            idle,
            iowait: 0,
            irq: 0,
            softirq: 0,
            steal: 0,
            guest: 0,
        }
    }

    #[test]
    fn test_utilization_between_two_samples() {
        // prev busy 15, idle 100; cur busy 30, idle 150: 25% of the delta busy
        let util =
            utilization_percent(&counters(20, 10, 150), &counters(10, 5, 100)).unwrap();
        assert!((util - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_total_delta_is_a_calculation_error() {
        let same = counters(10, 5, 100);
        let err = utilization_percent(&same, &same).unwrap_err();
        assert!(matches!(err, CollectorError::CalculationError(_)));
    }

    #[test]
    fn test_first_derive_uses_zero_baseline() {
        let mut deriver = MetricDeriver::new();
        let record = deriver
            .derive(
                &snapshot(&["cpu  10 0 5 100 0 0 0 0 0 0", "cpu0 10 0 5 100 0 0 0 0 0 0"]),
                "run_1",
            )
            .unwrap();

        assert_eq!(record.cpus.len(), 2);
        // Against an all-zero baseline: busy 15 of total 115
        let util = record.cpus["cpu"].utilization;
        assert!((util - (15.0 / 115.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_baseline_advances_between_cycles() {
        let mut deriver = MetricDeriver::new();
        deriver
            .derive(&snapshot(&["cpu 10 0 5 100 0 0 0 0 0 0"]), "run_1")
            .unwrap();
        let second = deriver
            .derive(&snapshot(&["cpu 20 0 10 150 0 0 0 0 0 0"]), "run_1")
            .unwrap();

        assert!((second.cpus["cpu"].utilization - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_numeric_counter_is_a_calculation_error() {
        let mut deriver = MetricDeriver::new();
        let err = deriver
            .derive(&snapshot(&["cpu 10 0 x 100 0 0 0 0 0 0"]), "run_1")
            .unwrap_err();
        assert!(matches!(err, CollectorError::CalculationError(_)));
    }

    #[test]
    fn test_unchanged_counters_drop_the_cycle_not_the_state() {
        let mut deriver = MetricDeriver::new();
        deriver
            .derive(&snapshot(&["cpu 10 0 5 100 0 0 0 0 0 0"]), "run_1")
            .unwrap();
        // Identical counters: zero delta, cycle dropped
        let err = deriver
            .derive(&snapshot(&["cpu 10 0 5 100 0 0 0 0 0 0"]), "run_1")
            .unwrap_err();
        assert!(matches!(err, CollectorError::CalculationError(_)));
    }

    #[test]
    fn test_missing_core_after_discovery_is_an_error() {
        let mut deriver = MetricDeriver::new();
        deriver
            .derive(
                &snapshot(&["cpu 10 0 5 100 0 0 0 0 0 0", "cpu0 10 0 5 100 0 0 0 0 0 0"]),
                "run_1",
            )
            .unwrap();
        let err = deriver
            .derive(&snapshot(&["cpu 20 0 10 150 0 0 0 0 0 0"]), "run_1")
            .unwrap_err();
        assert!(matches!(err, CollectorError::CalculationError(_)));
    }
}
