//! Per-connection IO pump.
//!
//! Every admitted connection runs exactly one read loop and one write loop.
//! The read loop is the only reader of the socket; the write loop is the only
//! writer of queued traffic. Whichever loop finishes first ends the other,
//! and the connection is then deregistered and closed.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use octohub_core::dispatch::MessageHandler;
use octohub_core::message::{Envelope, ERROR_INVALID_MESSAGE};
use tokio::time::Instant;

use crate::config::WebSocketConfig;
use crate::ws::connection::{ClientConnection, OutboundReceiver};
use crate::ws::manager::WsManager;

/// Why a loop stopped. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The close signal fired.
    Closed,
    /// The peer sent a close frame or ended the stream.
    PeerClosed,
    /// No inbound frame arrived within the read timeout.
    ReadTimeout,
    /// A socket read or write failed.
    SocketError,
    /// The outbound queue overflowed.
    SlowConsumer,
}

/// Run both loops for `conn` until either ends, then tear the connection down.
pub async fn run<S>(
    conn: Arc<ClientConnection>,
    stream: S,
    outbound: OutboundReceiver,
    manager: Arc<WsManager>,
    handler: Arc<dyn MessageHandler>,
    config: WebSocketConfig,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let exit = tokio::select! {
        exit = read_loop(&conn, stream, handler.as_ref(), &config) => exit,
        exit = write_loop(&conn, outbound, config.write_timeout) => exit,
    };

    // The identity check leaves a replacement connection untouched.
    manager.remove(&conn).await;
    conn.close().await;

    tracing::info!(
        client_id = %conn.id(),
        kind = %conn.kind(),
        conn_id = %conn.conn_id(),
        ?exit,
        "WebSocket disconnected",
    );
}

/// Read frames until the peer goes away, the read deadline passes, or the
/// close signal fires.
///
/// Any inbound frame counts as activity and pushes the deadline out.
pub async fn read_loop<S>(
    conn: &ClientConnection,
    mut stream: S,
    handler: &dyn MessageHandler,
    config: &WebSocketConfig,
) -> PumpExit
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut deadline = Instant::now() + config.read_timeout;

    loop {
        let next = tokio::select! {
            biased;
            _ = conn.closed() => return PumpExit::Closed,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::debug!(client_id = %conn.id(), "WebSocket read timed out");
                return PumpExit::ReadTimeout;
            }
            Ok(None) => return PumpExit::PeerClosed,
            Ok(Some(Err(e))) => {
                tracing::debug!(client_id = %conn.id(), error = %e, "WebSocket receive error");
                return PumpExit::SocketError;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        conn.touch();
        deadline = Instant::now() + config.read_timeout;

        match frame {
            Message::Text(text) => dispatch(conn, text.as_bytes(), handler),
            Message::Binary(bytes) => dispatch(conn, &bytes, handler),
            Message::Ping(payload) => {
                if let Err(e) = conn
                    .send_direct(Message::Pong(payload), config.write_timeout)
                    .await
                {
                    tracing::debug!(client_id = %conn.id(), error = %e, "Failed to answer ping");
                    return PumpExit::SocketError;
                }
            }
            Message::Pong(_) => {
                tracing::trace!(client_id = %conn.id(), "Pong received");
            }
            Message::Close(_) => return PumpExit::PeerClosed,
        }
    }
}

/// Drain the outbound queue onto the socket, one frame at a time.
pub async fn write_loop(
    conn: &ClientConnection,
    mut outbound: OutboundReceiver,
    write_timeout: Duration,
) -> PumpExit {
    loop {
        tokio::select! {
            biased;
            _ = conn.closed() => return PumpExit::Closed,
            _ = conn.outbound_closed() => {
                if let Err(e) = conn.send_direct(Message::Close(None), write_timeout).await {
                    tracing::debug!(client_id = %conn.id(), error = %e, "Failed to send close frame");
                }
                return PumpExit::SlowConsumer;
            }
            next = outbound.recv() => {
                let Some(text) = next else {
                    return PumpExit::Closed;
                };
                if let Err(e) = conn.send_direct(Message::Text(text.into()), write_timeout).await {
                    tracing::debug!(client_id = %conn.id(), error = %e, "WebSocket write failed");
                    return PumpExit::SocketError;
                }
            }
        }
    }
}

fn dispatch(conn: &ClientConnection, raw: &[u8], handler: &dyn MessageHandler) {
    let message = match Envelope::from_slice(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(client_id = %conn.id(), error = %e, "Malformed inbound message");
            conn.enqueue(&Envelope::error(
                ERROR_INVALID_MESSAGE,
                "Malformed message",
                Some(e.to_string()),
            ));
            return;
        }
    };

    if let Some(reply) = handler.handle(&message, conn.id(), conn.kind()) {
        conn.enqueue(&reply);
    }
}
