use std::sync::Arc;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Runs jobs against the local ComfyUI instance.
    pub dispatcher: Dispatcher,
    /// Transport configuration.
    pub config: Arc<ServerConfig>,
}
