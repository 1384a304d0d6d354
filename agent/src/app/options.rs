//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// On-disk layout
    pub layout: StorageLayout,

    /// Control-plane server configuration
    pub server: ServerOptions,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            server: ServerOptions::default(),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Control-plane HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}
