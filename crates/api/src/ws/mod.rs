//! WebSocket infrastructure for the hub.
//!
//! Provides the connection registry, the per-connection IO pump, stale
//! connection reclamation, and the HTTP upgrade handlers used by Axum routes.

pub mod cleanup;
pub mod connection;
mod handler;
pub mod manager;
pub mod pump;
pub mod transport;

pub use cleanup::{CleanupConfig, ConnectionReaper};
pub use connection::ClientConnection;
pub use handler::{node_ws_handler, user_ws_handler};
pub use manager::WsManager;
pub use transport::{SocketTransport, Transport, TransportError};
