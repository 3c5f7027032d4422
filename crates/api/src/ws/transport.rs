//! The write side of a client socket, behind a trait.
//!
//! Three parties write to a connection: the write loop (queued envelopes),
//! the read loop (pong replies) and the cleanup worker (liveness pings).
//! They share one [`Transport`], which serializes their frames.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;

/// Failure to put a frame on the wire.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("write deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("transport already closed")]
    Closed,

    #[error("socket error: {0}")]
    Socket(#[from] axum::Error),
}

/// Outbound half of a client connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Send a close frame and release the socket. Idempotent.
    async fn close(&self);
}

/// Write half of an upgraded axum [`WebSocket`].
pub struct SocketTransport {
    sink: Mutex<Option<SplitSink<WebSocket, Message>>>,
}

impl SocketTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::Closed)?;
        sink.send(message).await?;
        Ok(())
    }

    async fn close(&self) {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return;
        };
        if let Err(e) = sink.close().await {
            tracing::trace!(error = %e, "Socket already gone while closing");
        }
    }
}
