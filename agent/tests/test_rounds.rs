//! Round controller integration tests

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetprobe::collector::node::NodeTarget;
use fleetprobe::collector::round::RoundController;
use fleetprobe::collector::supervisor::RestartState;
use fleetprobe::filesys::dir::Dir;
use fleetprobe::transport::Connection;

use common::{MockBehavior, MockConnection};

fn target(connection: &Arc<MockConnection>, data_dir: &Dir) -> NodeTarget {
    NodeTarget {
        connection: connection.clone(),
        data_dir: data_dir.clone(),
        store: None,
    }
}

#[tokio::test]
async fn test_skip_if_busy_sheds_triggers_instead_of_queuing() {
    let data_dir = Dir::create_temp_dir("rounds-busy").await.unwrap();
    // Every cycle takes 500 ms against a 150 ms interval
    let conn = Arc::new(
        MockConnection::new("slowhost")
            .with_cycle_delays(vec![Duration::from_millis(500)]),
    );

    let controller = RoundController::new(
        "run_busy",
        Duration::from_millis(150),
        Arc::new(RestartState::new()),
    );
    let stop = controller.stop_signal();
    let task = tokio::spawn(controller.run(vec![target(&conn, &data_dir)]));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    stop.set();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("controller did not stop")
        .unwrap();

    // Roughly 7 trigger opportunities fired, but a busy host sheds them:
    // at most elapsed/cycle-duration cycles ever start
    let cycles = conn.cycles();
    assert!(cycles >= 1, "expected at least one cycle");
    assert!(cycles <= 3, "busy triggers were queued, got {} cycles", cycles);

    data_dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_dead_worker_stops_the_whole_round_loop() {
    let data_dir = Dir::create_temp_dir("rounds-dead").await.unwrap();
    let dying = Arc::new(
        MockConnection::new("dying").with_behavior(MockBehavior::FailUnhandled),
    );
    let healthy = Arc::new(MockConnection::new("healthy"));

    let controller = RoundController::new(
        "run_dead",
        Duration::from_millis(150),
        Arc::new(RestartState::new()),
    );
    let task = tokio::spawn(controller.run(vec![
        target(&dying, &data_dir),
        target(&healthy, &data_dir),
    ]));

    // No external stop: the dead worker alone must end the run for all hosts
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("controller kept running with a dead worker")
        .unwrap();

    assert!(
        healthy.cycles() >= 1,
        "healthy host should have collected before the abort"
    );
    assert!(!healthy.is_active().await, "connections must be closed");

    data_dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_are_serialized_by_the_shared_lock() {
    let data_dir = Dir::create_temp_dir("rounds-lock").await.unwrap();
    let markers = Arc::new(Mutex::new(Vec::new()));

    // Every command fails, so every worker reconnects on every cycle; each
    // connect holds the lock for 50 ms bracketed by begin/end markers
    let conns: Vec<Arc<MockConnection>> = (0..3)
        .map(|i| {
            Arc::new(
                MockConnection::new(&format!("host{}", i))
                    .with_behavior(MockBehavior::FailCommands)
                    .with_connect_hold(Duration::from_millis(50))
                    .with_markers(markers.clone()),
            )
        })
        .collect();

    let controller = RoundController::new(
        "run_lock",
        Duration::from_secs(1),
        Arc::new(RestartState::new()),
    );
    let stop = controller.stop_signal();
    let targets = conns.iter().map(|c| target(c, &data_dir)).collect();
    let task = tokio::spawn(controller.run(targets));

    // Initial connects plus the first round of failed cycles
    tokio::time::sleep(Duration::from_millis(700)).await;
    stop.set();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("controller did not stop")
        .unwrap();

    let markers = markers.lock().unwrap();
    assert!(
        markers.len() >= 6,
        "expected at least the three initial connects and one reconnect round, got {:?}",
        *markers
    );
    // With the reconnect lock held, every begin is immediately followed by
    // its own end; an interleaved begin would mean two concurrent connects
    for pair in markers.chunks(2) {
        let [begin, end] = pair else {
            panic!("odd marker count: {:?}", *markers);
        };
        assert_eq!(
            begin.replacen("begin", "end", 1),
            *end,
            "interleaved connects: {:?}",
            *markers
        );
    }

    data_dir.delete().await.unwrap();
}
