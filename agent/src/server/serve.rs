//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::CollectorError;
use crate::server::handlers::{
    collection_results_handler, collections_handler, health_handler, index_handler,
    start_handler, stop_handler,
};
use crate::server::state::ServerState;

/// Start the control-plane HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), CollectorError>>, CollectorError> {
    let app = Router::new()
        // Banner and health
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        // Run control
        .route("/api/start", post(start_handler))
        .route("/api/stop", post(stop_handler))
        // Results
        .route("/api/results/collections", get(collections_handler))
        .route(
            "/api/results/collections/{run_id}/{host}",
            get(collection_results_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CollectorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| CollectorError::ServerError(e.to_string()))
    });

    Ok(handle)
}
