use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use octohub_core::dispatch::DefaultHandler;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use octohub_api::config::{LogFormat, ServerConfig};
use octohub_api::router::build_app_router;
use octohub_api::state::AppState;

/// Upper bound on waiting for each background task after cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "octohub_api=debug,tower_http=debug".into());
    match config.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    if config.uses_default_secret() {
        tracing::warn!("SIGNATURE_SECRET is the development default; set it before deploying");
    }

    // --- App state ---
    let state = AppState::new(config.clone(), Arc::new(DefaultHandler));
    let ws_manager = Arc::clone(&state.ws_manager);
    let pump_tasks = state.pump_tasks.clone();

    // --- Connection cleanup ---
    let cleanup_cancel = CancellationToken::new();
    let (scheduler_handle, worker_handle) = state.reaper.start(cleanup_cancel.clone());

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cleanup_cancel.cancel();
    let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, scheduler_handle).await;
    let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, worker_handle).await;
    tracing::info!("Connection cleanup stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    // Upgraded sockets outlive `serve`; let each pump finish its teardown.
    pump_tasks.close();
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, pump_tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = pump_tasks.len(),
            "Timed out waiting for WebSocket teardown",
        );
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
