use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use octohub_core::types::{unix_now, ClientKind};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::ws::connection::ClientConnection;

/// Per-connection detail is only listed for a class with at most this many
/// connections, so `stats()` stays cheap at scale.
pub const STATS_DETAIL_LIMIT: usize = 100;

/// The two class-partitioned mappings, guarded together by one lock.
#[derive(Default)]
struct ConnectionMaps {
    users: HashMap<String, Arc<ClientConnection>>,
    nodes: HashMap<String, Arc<ClientConnection>>,
}

impl ConnectionMaps {
    fn of(&self, kind: ClientKind) -> &HashMap<String, Arc<ClientConnection>> {
        match kind {
            ClientKind::User => &self.users,
            ClientKind::Node => &self.nodes,
        }
    }

    fn of_mut(&mut self, kind: ClientKind) -> &mut HashMap<String, Arc<ClientConnection>> {
        match kind {
            ClientKind::User => &mut self.users,
            ClientKind::Node => &mut self.nodes,
        }
    }

    fn all(&self) -> impl Iterator<Item = &Arc<ClientConnection>> {
        self.users.values().chain(self.nodes.values())
    }
}

/// Snapshot returned by [`WsManager::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub user_connections: usize,
    pub node_connections: usize,
    pub total_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_details: Option<Vec<ConnectionDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_details: Option<Vec<ConnectionDetail>>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionDetail {
    pub id: String,
    /// Last activity, Unix seconds.
    pub last_active: i64,
    /// Seconds since the last activity.
    pub duration: f64,
}

/// Registry of live client connections.
///
/// Holds at most one connection per (class, identity). Thread-safe via an
/// interior `RwLock`; designed to be wrapped in `Arc` and shared across the
/// application. No socket I/O ever happens while the lock is held.
pub struct WsManager {
    connections: RwLock<ConnectionMaps>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(ConnectionMaps::default()),
        }
    }

    /// Register a connection, displacing any previous one under the same key.
    ///
    /// The displaced connection is returned still open; the caller notifies
    /// and closes it after the lock has been released.
    pub async fn add(&self, conn: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let kind = conn.kind();
        let id = conn.id().to_string();
        let conn_id = conn.conn_id();

        let previous = self
            .connections
            .write()
            .await
            .of_mut(kind)
            .insert(id.clone(), conn);

        tracing::info!(
            client_id = %id,
            kind = %kind,
            %conn_id,
            replaced = previous.is_some(),
            "Connection registered",
        );
        previous
    }

    /// Remove `conn` if it is still the connection mapped under its key.
    ///
    /// Returns `false` when the key is absent or now maps to a newer
    /// connection; in that case nothing is touched.
    pub async fn remove(&self, conn: &Arc<ClientConnection>) -> bool {
        let mut maps = self.connections.write().await;
        let map = maps.of_mut(conn.kind());

        let is_current = map
            .get(conn.id())
            .is_some_and(|current| Arc::ptr_eq(current, conn));
        if is_current {
            map.remove(conn.id());
            tracing::info!(
                client_id = %conn.id(),
                kind = %conn.kind(),
                conn_id = %conn.conn_id(),
                "Connection removed",
            );
        }
        is_current
    }

    /// Look up the live connection for a key.
    pub async fn get(&self, kind: ClientKind, id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.of(kind).get(id).cloned()
    }

    /// Whether a connection is registered under the key.
    pub async fn contains(&self, kind: ClientKind, id: &str) -> bool {
        self.connections.read().await.of(kind).contains_key(id)
    }

    /// Return the current number of active connections across both classes.
    pub async fn connection_count(&self) -> usize {
        let maps = self.connections.read().await;
        maps.users.len() + maps.nodes.len()
    }

    /// Collect connections idle for longer than `stale_after`.
    ///
    /// Only the read lock is taken, and only for the scan itself.
    pub async fn stale_connections(&self, stale_after: Duration) -> Vec<Arc<ClientConnection>> {
        let maps = self.connections.read().await;
        maps.all()
            .filter(|conn| conn.idle_for() > stale_after)
            .cloned()
            .collect()
    }

    /// Aggregate counts, plus per-connection detail for small classes.
    pub async fn stats(&self) -> ConnectionStats {
        let maps = self.connections.read().await;
        let user_connections = maps.users.len();
        let node_connections = maps.nodes.len();

        ConnectionStats {
            user_connections,
            node_connections,
            total_connections: user_connections + node_connections,
            user_details: details(&maps.users),
            node_details: details(&maps.nodes),
            timestamp: unix_now(),
        }
    }

    /// Empty the registry and fire every connection's close signal.
    ///
    /// Used during graceful shutdown. Each connection's pump notices the
    /// signal and closes its own socket.
    pub async fn shutdown_all(&self) -> usize {
        let mut guard = self.connections.write().await;
        let maps = &mut *guard;
        let count = maps.users.len() + maps.nodes.len();
        for conn in maps.users.drain().chain(maps.nodes.drain()).map(|(_, c)| c) {
            conn.signal_close();
        }
        tracing::info!(count, "Closed all WebSocket connections");
        count
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn details(map: &HashMap<String, Arc<ClientConnection>>) -> Option<Vec<ConnectionDetail>> {
    if map.len() > STATS_DETAIL_LIMIT {
        return None;
    }

    Some(
        map.iter()
            .map(|(id, conn)| ConnectionDetail {
                id: id.clone(),
                last_active: conn.last_active().timestamp(),
                duration: conn.idle_for().as_secs_f64(),
            })
            .collect(),
    )
}
