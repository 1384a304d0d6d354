//! Whole-run scenario: supervisor, controller, worker and sink together

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use fleetprobe::collector::supervisor::{Run, RunSupervisor, SupervisorOptions};
use fleetprobe::filesys::dir::Dir;

use common::MockConnection;

/// One host answering two full cycles before the stop deadline: the
/// immediate trigger, one interval tick (slow enough that the next tick is
/// shed), and the forced post-stop collection yield exactly three records.
#[tokio::test]
async fn test_run_window_produces_three_records_in_order() {
    let data_dir = Dir::create_temp_dir("end-to-end").await.unwrap();
    let conn = Arc::new(MockConnection::new("nodeA").with_cycle_delays(vec![
        Duration::from_millis(300),
        Duration::from_millis(2500),
        Duration::from_millis(100),
    ]));

    let start_time = Utc::now();
    let run = Run {
        run_id: "run_e2e".to_string(),
        start_time,
        stop_time: start_time + chrono::Duration::seconds(5),
        interval: Duration::from_secs(2),
    };

    let targets = {
        let conn = conn.clone();
        let data_dir = data_dir.clone();
        Arc::new(move || {
            vec![fleetprobe::collector::node::NodeTarget {
                connection: conn.clone(),
                data_dir: data_dir.clone(),
                store: None,
            }]
        })
    };
    let supervisor = RunSupervisor::new(run, SupervisorOptions::default(), targets);

    tokio::time::timeout(Duration::from_secs(15), supervisor.run())
        .await
        .expect("supervised run did not finish");

    // Exactly one worker directory, one file for the host
    let run_dirs = data_dir.list_dir_names().await.unwrap();
    assert_eq!(run_dirs.len(), 1, "expected one node run dir: {:?}", run_dirs);
    assert!(run_dirs[0].starts_with("run_e2e_"));

    let lines = data_dir
        .subdir(&run_dirs[0])
        .file("nodeA.json")
        .read_lines()
        .await
        .unwrap();
    assert_eq!(lines.len(), 3, "expected 3 derived records: {:?}", lines);

    // Every line is a self-contained record for this run, in timestamp order
    let records: Vec<serde_json::Value> = lines
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let timestamps: Vec<&str> = records
        .iter()
        .map(|r| r["timestamp"].as_str().unwrap())
        .collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted, "records out of order");

    for record in &records {
        assert_eq!(record["run_id"].as_str().unwrap(), format!("{}", run_dirs[0]));
        assert!(record["cpus"]["cpu"]["utilization"].is_f64());
        assert_eq!(record["memory"]["MemTotal"], "16384256");
    }

    data_dir.delete().await.unwrap();
}
