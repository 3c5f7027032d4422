pub mod health;
pub mod status;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the WebSocket admission routes.
///
/// ```text
/// /ws/user?user_id=&timestamp=&signature=     end-user connection
/// /ws/node?node_id=&timestamp=&signature=     machine-node connection (alias: pc_id)
/// ```
pub fn ws_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/user", get(ws::user_ws_handler))
        .route("/ws/node", get(ws::node_ws_handler))
}
