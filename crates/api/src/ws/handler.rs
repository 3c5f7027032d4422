use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::StreamExt;
use octohub_core::error::CoreError;
use octohub_core::message::{Action, ConnectedData, Envelope};
use octohub_core::types::{unix_now, ClientKind};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::connection::ClientConnection;
use crate::ws::pump;
use crate::ws::transport::SocketTransport;

const SUPERSEDED_REASON: &str = "superseded by a new connection";

/// Query string of `GET /ws/user`.
#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
}

/// Query string of `GET /ws/node`. `pc_id` is accepted as an alias.
#[derive(Debug, Deserialize)]
pub struct NodeQuery {
    #[serde(alias = "pc_id")]
    pub node_id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
}

/// Credentials presented at admission, all present and non-empty.
#[derive(Debug)]
struct Admission {
    id: String,
    timestamp: String,
    signature: String,
}

impl Admission {
    fn from_parts(
        id: Option<String>,
        timestamp: Option<String>,
        signature: Option<String>,
    ) -> AppResult<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        match (present(id), present(timestamp), present(signature)) {
            (Some(id), Some(timestamp), Some(signature)) => Ok(Self {
                id,
                timestamp,
                signature,
            }),
            _ => Err(AppError::BadRequest("Missing required parameters".into())),
        }
    }
}

/// GET /ws/user -- admit an end-user connection.
pub async fn user_ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(query): Query<UserQuery>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let admission = Admission::from_parts(query.user_id, query.timestamp, query.signature)?;
    admit(ws, state, ClientKind::User, admission).await
}

/// GET /ws/node -- admit a machine-node connection.
pub async fn node_ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(query): Query<NodeQuery>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let admission = Admission::from_parts(query.node_id, query.timestamp, query.signature)?;
    admit(ws, state, ClientKind::Node, admission).await
}

/// Authenticate, check capacity, then upgrade.
///
/// Every rejection happens before the upgrade, so a refused client gets a
/// plain HTTP error response. Credentials are checked before the upgrade
/// headers themselves.
async fn admit(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    state: AppState,
    kind: ClientKind,
    admission: Admission,
) -> AppResult<Response> {
    let signature_ok = state.gate.validate(
        &admission.id,
        &admission.timestamp,
        &admission.signature,
        state.config.signature.timeout_secs,
    );
    if !signature_ok {
        tracing::warn!(client_id = %admission.id, %kind, "Rejected connection with invalid signature");
        return Err(CoreError::Unauthorized("Invalid signature".into()).into());
    }

    // Advisory: two concurrent admissions may both pass. A reconnect under an
    // occupied key never grows the registry, so it is always let through.
    let at_capacity = state.ws_manager.connection_count().await >= state.config.max_connections;
    if at_capacity && !state.ws_manager.contains(kind, &admission.id).await {
        tracing::warn!(
            client_id = %admission.id,
            %kind,
            max_connections = state.config.max_connections,
            "Rejected connection, server at capacity",
        );
        return Err(CoreError::Unavailable("Too many connections".into()).into());
    }

    let ws = ws?;
    let id = admission.id;
    let max_message_size = state.config.websocket.max_message_size;
    let tracker = state.pump_tasks.clone();
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            tracker.track_future(handle_socket(socket, state, kind, id))
        }))
}

/// Manage a single WebSocket connection after upgrade.
async fn handle_socket(socket: WebSocket, state: AppState, kind: ClientKind, id: String) {
    let (sink, stream) = socket.split();
    let transport = Arc::new(SocketTransport::new(sink));
    let (conn, outbound) = ClientConnection::new(
        id,
        kind,
        transport,
        state.config.websocket.outbound_capacity,
    );

    if let Some(previous) = state.ws_manager.add(Arc::clone(&conn)).await {
        let write_timeout = state.config.websocket.write_timeout;
        state.pump_tasks.spawn(async move {
            previous
                .close_with_notice(&Envelope::disconnected(SUPERSEDED_REASON), write_timeout)
                .await;
        });
    }

    tracing::info!(
        client_id = %conn.id(),
        %kind,
        conn_id = %conn.conn_id(),
        "WebSocket connected",
    );

    conn.enqueue(&Envelope::system(Action::Connected, &connected_data(&conn)));

    pump::run(
        conn,
        stream,
        outbound,
        Arc::clone(&state.ws_manager),
        Arc::clone(&state.handler),
        state.config.websocket.clone(),
    )
    .await;
}

fn connected_data(conn: &ClientConnection) -> ConnectedData {
    let id = conn.id().to_string();
    let (user_id, node_id) = match conn.kind() {
        ClientKind::User => (Some(id.clone()), None),
        ClientKind::Node => (None, Some(id.clone())),
    };
    ConnectedData {
        user_id,
        node_id,
        session_id: id,
        server_time: unix_now(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn all_three_parameters_are_required() {
        let ok = Admission::from_parts(Some("u1".into()), Some("1".into()), Some("ab".into()));
        assert!(ok.is_ok());

        assert_matches!(
            Admission::from_parts(None, Some("1".into()), Some("ab".into())),
            Err(AppError::BadRequest(_))
        );
        assert_matches!(
            Admission::from_parts(Some("u1".into()), Some(String::new()), Some("ab".into())),
            Err(AppError::BadRequest(_))
        );
        assert_matches!(
            Admission::from_parts(Some("u1".into()), Some("1".into()), None),
            Err(AppError::BadRequest(_))
        );
    }

    #[test]
    fn node_query_accepts_pc_id_alias() {
        let query: NodeQuery =
            serde_json::from_value(serde_json::json!({ "pc_id": "pc-7" })).unwrap();
        assert_eq!(query.node_id.as_deref(), Some("pc-7"));
    }
}
