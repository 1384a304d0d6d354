//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::errors::CollectorError;
use crate::registry::RunRegistry;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::settings::Settings;

/// Run the agent in serve mode until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    settings: Settings,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), CollectorError> {
    info!("Initializing fleetprobe agent...");

    options.layout.setup().await?;
    let registry = Arc::new(RunRegistry::new(options.layout.clone(), settings));

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);

    let server_state = Arc::new(ServerState::new(registry.clone()));
    let mut server_shutdown_rx = shutdown_tx.subscribe();
    let server_handle = serve(&options.server, server_state, async move {
        let _ = server_shutdown_rx.recv().await;
    })
    .await?;

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(
        options.max_shutdown_delay,
        shutdown_impl(registry, server_handle),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            error!(
                "Shutdown timed out after {:?}, forcing shutdown...",
                options.max_shutdown_delay
            );
            std::process::exit(1);
        }
    }
}

async fn shutdown_impl(
    registry: Arc<RunRegistry>,
    server_handle: JoinHandle<Result<(), CollectorError>>,
) -> Result<(), CollectorError> {
    // 1. Active runs
    registry.stop_all().await;

    // 2. HTTP server
    server_handle
        .await
        .map_err(|e| CollectorError::ShutdownError(e.to_string()))??;

    info!("Shutdown complete");
    Ok(())
}
