use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::ws::manager::ConnectionStats;

/// Registry snapshot plus the depth of the cleanup queue.
#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub stats: ConnectionStats,
    pub cleanup_queue_size: usize,
}

/// GET /status -- connection counts and per-connection detail.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        stats: state.ws_manager.stats().await,
        cleanup_queue_size: state.reaper.queue_len(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status))
}
