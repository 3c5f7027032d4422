//! Per-connection state shared by the IO pump, the registry and the
//! cleanup worker.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chrono::Utc;
use octohub_core::message::Envelope;
use octohub_core::types::{ClientKind, Timestamp};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ws::transport::{Transport, TransportError};

/// Receiving end of a connection's outbound queue; owned by the write loop.
pub type OutboundReceiver = mpsc::Receiver<String>;

/// One admitted client.
///
/// Shared as `Arc<ClientConnection>`. Two `Arc`s name the same connection
/// only if they point at the same allocation, which is what the registry
/// compares when removing.
pub struct ClientConnection {
    id: String,
    kind: ClientKind,
    /// Unique per admission, so log lines of a reconnecting client can be
    /// told apart.
    conn_id: Uuid,
    transport: Arc<dyn Transport>,
    outbound: mpsc::Sender<String>,
    /// Fired when the outbound queue overflows; the write loop then sends a
    /// close frame and exits.
    outbound_closed: CancellationToken,
    /// Broadcast-once close signal observed by both loops.
    close: CancellationToken,
    last_active: watch::Sender<Timestamp>,
}

impl ClientConnection {
    /// Create a connection record and the receiver its write loop drains.
    pub fn new(
        id: impl Into<String>,
        kind: ClientKind,
        transport: Arc<dyn Transport>,
        outbound_capacity: usize,
    ) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(outbound_capacity.max(1));
        let (last_active, _) = watch::channel(Utc::now());
        let conn = Self {
            id: id.into(),
            kind,
            conn_id: Uuid::new_v4(),
            transport,
            outbound: tx,
            outbound_closed: CancellationToken::new(),
            close: CancellationToken::new(),
            last_active,
        };
        (Arc::new(conn), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    // ---- activity ----

    /// Record activity now.
    pub fn touch(&self) {
        self.last_active.send_replace(Utc::now());
    }

    /// Overwrite the last-active time.
    #[doc(hidden)]
    pub fn set_last_active(&self, at: Timestamp) {
        self.last_active.send_replace(at);
    }

    pub fn last_active(&self) -> Timestamp {
        *self.last_active.borrow()
    }

    /// Time since the last observed activity (zero if the clock went back).
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_active())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Watch last-active updates; the cleanup probe waits on this for a pong.
    pub fn subscribe_activity(&self) -> watch::Receiver<Timestamp> {
        self.last_active.subscribe()
    }

    // ---- outbound queue ----

    /// Queue an envelope for the write loop without blocking.
    ///
    /// Returns `false` if the message was dropped. A full queue means the
    /// client is not keeping up: the queue is marked closed so the write loop
    /// disconnects it instead of letting it hold memory.
    pub fn enqueue(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(text) => self.enqueue_text(text),
            Err(e) => {
                tracing::error!(client_id = %self.id, error = %e, "Failed to encode envelope");
                false
            }
        }
    }

    /// Queue an already-encoded payload. See [`enqueue`](Self::enqueue).
    pub fn enqueue_text(&self, text: String) -> bool {
        if self.is_closed() || self.outbound_closed.is_cancelled() {
            return false;
        }

        match self.outbound.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    client_id = %self.id,
                    kind = %self.kind,
                    conn_id = %self.conn_id,
                    reason = %e,
                    "Outbound queue unavailable, disconnecting client",
                );
                self.outbound_closed.cancel();
                false
            }
        }
    }

    /// Resolves once the outbound queue has been marked closed.
    pub async fn outbound_closed(&self) {
        self.outbound_closed.cancelled().await;
    }

    pub fn is_outbound_closed(&self) -> bool {
        self.outbound_closed.is_cancelled()
    }

    // ---- transport ----

    /// Write a frame straight to the transport, bounded by `deadline`.
    pub async fn send_direct(
        &self,
        message: Message,
        deadline: Duration,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(deadline, self.transport.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(deadline)),
        }
    }

    /// Ping the client and wait for any sign of life.
    ///
    /// Returns `true` if the ping was written and activity (normally the pong
    /// the read loop records) was observed within `deadline`.
    pub async fn probe(&self, deadline: Duration) -> bool {
        // A fresh receiver treats the current value as already seen.
        let mut activity = self.subscribe_activity();

        if let Err(e) = self.send_direct(Message::Ping(Default::default()), deadline).await {
            tracing::debug!(client_id = %self.id, error = %e, "Liveness ping failed");
            return false;
        }

        tokio::select! {
            _ = self.close.cancelled() => false,
            changed = tokio::time::timeout(deadline, activity.changed()) => {
                matches!(changed, Ok(Ok(())))
            }
        }
    }

    // ---- close ----

    /// Resolves once the close signal has fired.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Fire the close signal without touching the socket.
    ///
    /// Both loops observe it and unwind; the pump's teardown then closes the
    /// transport.
    pub fn signal_close(&self) {
        self.close.cancel();
    }

    /// Fire the close signal and close the transport. Idempotent.
    pub async fn close(&self) {
        self.close.cancel();
        self.transport.close().await;
    }

    /// Tell a displaced connection why it is being dropped, then close it.
    pub async fn close_with_notice(&self, notice: &Envelope, deadline: Duration) {
        if let Ok(text) = notice.to_json() {
            if let Err(e) = self.send_direct(Message::Text(text.into()), deadline).await {
                tracing::debug!(client_id = %self.id, error = %e, "Could not deliver close notice");
            }
        }
        self.close().await;
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("conn_id", &self.conn_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
