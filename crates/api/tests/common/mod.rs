#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::Message;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use octohub_core::dispatch::DefaultHandler;
use octohub_core::message::Envelope;
use octohub_core::signature::SignatureGate;
use octohub_core::types::ClientKind;
use serde_json::Value;
use tower::ServiceExt;

use octohub_api::config::ServerConfig;
use octohub_api::router::build_app_router;
use octohub_api::state::AppState;
use octohub_api::ws::connection::{ClientConnection, OutboundReceiver};
use octohub_api::ws::{Transport, TransportError};

pub const TEST_SECRET: &str = "test-secret";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin and a known signing secret.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        ..ServerConfig::default()
    };
    config.signature.secret = TEST_SECRET.to_string();
    config
}

pub fn test_state(config: ServerConfig) -> AppState {
    AppState::new(config, Arc::new(DefaultHandler))
}

/// Build the full application router with all middleware layers.
pub fn build_test_app(config: ServerConfig) -> (Router, AppState) {
    let state = test_state(config.clone());
    (build_app_router(state.clone(), &config), state)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Query string carrying valid credentials for `id`.
pub fn signed_query(kind: ClientKind, id: &str) -> String {
    let (timestamp, signature) = SignatureGate::new(TEST_SECRET).generate_signature(id);
    let id_param = match kind {
        ClientKind::User => "user_id",
        ClientKind::Node => "node_id",
    };
    format!("{id_param}={id}&timestamp={timestamp}&signature={signature}")
}

/// Serve the app on an ephemeral port.
pub async fn spawn_server(config: ServerConfig) -> (SocketAddr, AppState) {
    let (app, state) = build_test_app(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// Transport that records every frame instead of writing to a socket.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<Message>>,
    closed: AtomicBool,
    fail_writes: AtomicBool,
    /// When set, every ping is answered by marking this connection active,
    /// the way the read loop does on a real pong.
    responder: Mutex<Option<Weak<ClientConnection>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer_pings_for(&self, conn: &Arc<ClientConnection>) {
        *self.responder.lock().unwrap() = Some(Arc::downgrade(conn));
    }

    /// Make every subsequent write fail, like a peer that vanished.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<Message> {
        self.frames.lock().unwrap().clone()
    }

    pub fn ping_count(&self) -> usize {
        self.frames()
            .iter()
            .filter(|m| matches!(m, Message::Ping(_)))
            .count()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.frames()
            .iter()
            .filter_map(|m| match m {
                Message::Text(text) => Envelope::from_slice(text.as_bytes()).ok(),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let is_ping = matches!(message, Message::Ping(_));
        self.frames.lock().unwrap().push(message);

        if is_ping {
            let responder = self.responder.lock().unwrap().clone();
            if let Some(conn) = responder.and_then(|weak| weak.upgrade()) {
                conn.touch();
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A connection backed by a fresh [`RecordingTransport`].
pub fn recorded_connection(
    id: &str,
    kind: ClientKind,
    capacity: usize,
) -> (Arc<ClientConnection>, OutboundReceiver, Arc<RecordingTransport>) {
    let transport = RecordingTransport::new();
    let (conn, rx) = ClientConnection::new(
        id,
        kind,
        Arc::clone(&transport) as Arc<dyn Transport>,
        capacity,
    );
    (conn, rx, transport)
}

/// Push a connection's last activity `by` into the past.
pub fn age(conn: &ClientConnection, by: Duration) {
    let by = chrono::Duration::from_std(by).unwrap();
    conn.set_last_active(chrono::Utc::now() - by);
}
