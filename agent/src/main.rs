//! fleetprobe - Entry Point
//!
//! A scheduled telemetry-collection agent for remote host fleets. Serves the
//! control-plane API by default, or runs a single collection window when
//! start/stop/interval are given on the command line.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use fleetprobe::app::options::{AppOptions, ServerOptions};
use fleetprobe::app::run::run;
use fleetprobe::collector::supervisor::{Run, RunSupervisor, SupervisorOptions};
use fleetprobe::logs::{init_logging, LogOptions};
use fleetprobe::registry::target_factory;
use fleetprobe::storage::layout::StorageLayout;
use fleetprobe::storage::settings::Settings;
use fleetprobe::utils::{create_run_id, suffix_run_id, version_info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = layout.settings_file();
    let settings = match settings_file.read_json::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "Unable to read settings file {} ({}), using defaults",
                settings_file.path().display(),
                e
            );
            Settings::default()
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // One-shot console mode when a window is given on the command line
    if cli_args.contains_key("start") {
        return run_once(&cli_args, layout, settings).await;
    }

    // Serve mode
    let options = AppOptions {
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        layout,
        ..Default::default()
    };

    info!("Running fleetprobe with options: {:?}", options);
    let result = run(options, settings, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the agent: {e}");
    }
}

/// Run a single collection window without the API
async fn run_once(cli_args: &HashMap<String, String>, layout: StorageLayout, settings: Settings) {
    let Some((start, stop, interval)) = parse_window(cli_args) else {
        eprintln!(
            "Usage: fleetprobe --start=<secs> --stop=<secs> --interval=<secs> [--id=<name>]"
        );
        return;
    };

    if let Err(e) = layout.setup().await {
        error!("Failed to set up storage: {}", e);
        return;
    }

    let run_id = match cli_args.get("id") {
        Some(id) => suffix_run_id(id),
        None => create_run_id(),
    };

    let start_time = Utc::now() + chrono::Duration::seconds(start as i64);
    let run = Run {
        run_id: run_id.clone(),
        start_time,
        stop_time: start_time + chrono::Duration::seconds(stop as i64),
        interval: Duration::from_secs(interval),
    };

    let supervisor = RunSupervisor::new(
        run,
        SupervisorOptions {
            restart_delay: settings.collect.restart_delay(),
            restart_window: settings.collect.restart_window(),
        },
        target_factory(&settings, &layout),
    );

    // Ctrl+C requests an orderly stop of the run
    let shutdown = supervisor.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping run...");
            shutdown.set();
        }
    });

    info!("Running one-shot collection {}.", run_id);
    supervisor.run().await;
}

fn parse_window(cli_args: &HashMap<String, String>) -> Option<(u64, u64, u64)> {
    let start = cli_args.get("start")?.parse().ok()?;
    let stop = cli_args.get("stop")?.parse().ok()?;
    let interval = cli_args.get("interval")?.parse().ok()?;
    if stop == 0 || interval == 0 {
        return None;
    }
    Some((start, stop, interval))
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
