//! Server state

use std::sync::Arc;

use crate::registry::RunRegistry;

/// Shared state for the control-plane API
pub struct ServerState {
    pub registry: Arc<RunRegistry>,
}

impl ServerState {
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self { registry }
    }
}
