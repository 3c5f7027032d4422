use std::sync::Arc;

use octohub_core::dispatch::MessageHandler;
use octohub_core::signature::SignatureGate;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::ws::{ConnectionReaper, WsManager};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Registry of live user and node connections.
    pub ws_manager: Arc<WsManager>,
    /// Stale-connection reclamation; owns the cleanup queue.
    pub reaper: Arc<ConnectionReaper>,
    /// Admission signature check.
    pub gate: Arc<SignatureGate>,
    /// Business handler every inbound envelope is dispatched to.
    pub handler: Arc<dyn MessageHandler>,
    /// Every upgraded connection's pump runs on this tracker, so shutdown
    /// can wait for their teardown.
    pub pump_tasks: TaskTracker,
}

impl AppState {
    /// Wire up the shared services for `config`.
    ///
    /// The reaper is created but not started; call
    /// [`ConnectionReaper::start`] to spawn its tasks.
    pub fn new(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let ws_manager = Arc::new(WsManager::new());
        let reaper = ConnectionReaper::new(Arc::clone(&ws_manager), config.cleanup.clone());
        let gate = Arc::new(SignatureGate::new(config.signature.secret.clone()));

        Self {
            config: Arc::new(config),
            ws_manager,
            reaper,
            gate,
            handler,
            pump_tasks: TaskTracker::new(),
        }
    }
}
