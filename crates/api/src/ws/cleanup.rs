//! Stale-connection reclamation.
//!
//! A scheduler periodically scans the registry for connections that have
//! been quiet for longer than `stale_after` and pushes them onto a bounded
//! queue. A separate worker drains that queue, confirms each candidate is
//! really dead, and evicts it. The scan never blocks: if the queue is full
//! the candidate is skipped and picked up again on a later cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ws::connection::ClientConnection;
use crate::ws::manager::WsManager;

/// Tunable parameters for the cleanup protocol.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Time between registry scans.
    pub interval: Duration,
    /// Idle time after which a connection becomes a candidate.
    pub stale_after: Duration,
    /// A candidate active more recently than this is a false positive.
    pub grace: Duration,
    /// Deadline for the liveness ping and for the reply to it.
    pub probe_timeout: Duration,
    /// Capacity of the candidate queue.
    pub queue_capacity: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            grace: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(3),
            queue_capacity: 1000,
        }
    }
}

/// Result of one registry scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub candidates: usize,
    pub queued: usize,
    /// Candidates dropped because the queue was full.
    pub skipped: usize,
}

/// What the worker decided about one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The connection was active within the grace window.
    Recent,
    /// The connection answered the liveness probe.
    Alive,
    /// The connection was dead and has been removed and closed.
    Evicted,
    /// The connection was dead but the registry already maps its key to a
    /// newer connection (or to nothing); only the stale record was closed.
    Superseded,
}

/// Owns the candidate queue and runs the scheduler and worker loops.
pub struct ConnectionReaper {
    manager: Arc<WsManager>,
    config: CleanupConfig,
    tx: mpsc::Sender<Arc<ClientConnection>>,
    rx: Mutex<mpsc::Receiver<Arc<ClientConnection>>>,
}

impl ConnectionReaper {
    pub fn new(manager: Arc<WsManager>, config: CleanupConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Arc::new(Self {
            manager,
            config,
            tx,
            rx: Mutex::new(rx),
        })
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Number of candidates waiting for the worker.
    pub fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Spawn the scheduler and worker tasks.
    ///
    /// Both run until `cancel` is triggered.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> (JoinHandle<()>, JoinHandle<()>) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            stale_secs = self.config.stale_after.as_secs(),
            queue_capacity = self.config.queue_capacity,
            "Connection cleanup started",
        );

        let scheduler = tokio::spawn(Arc::clone(self).run_scheduler(cancel.clone()));
        let worker = tokio::spawn(Arc::clone(self).run_worker(cancel));
        (scheduler, worker)
    }

    async fn run_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        // The first tick completes immediately; nothing can be stale yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Cleanup scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    let summary = self.scan().await;
                    if summary.candidates > 0 {
                        tracing::debug!(
                            candidates = summary.candidates,
                            queued = summary.queued,
                            skipped = summary.skipped,
                            "Stale connection scan",
                        );
                    }
                }
            }
        }
    }

    async fn run_worker(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.rx.lock().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Cleanup worker stopping");
                    break;
                }
                next = rx.recv() => match next {
                    Some(conn) => {
                        self.process(&conn).await;
                    }
                    None => break,
                }
            }
        }
    }

    /// Scan the registry once and queue stale candidates without blocking.
    pub async fn scan(&self) -> ScanSummary {
        // The read lock is released inside stale_connections.
        let candidates = self.manager.stale_connections(self.config.stale_after).await;
        let mut summary = ScanSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for conn in candidates {
            match self.tx.try_send(conn) {
                Ok(()) => summary.queued += 1,
                Err(mpsc::error::TrySendError::Full(conn)) => {
                    tracing::warn!(client_id = %conn.id(), "Cleanup queue full, skipping connection");
                    summary.skipped += 1;
                }
                // The receiver lives as long as self.
                Err(mpsc::error::TrySendError::Closed(_)) => summary.skipped += 1,
            }
        }

        summary
    }

    /// Process everything currently queued, without waiting for more.
    ///
    /// Returns immediately with nothing processed if the worker task owns the
    /// queue.
    pub async fn process_pending(&self) -> Vec<CleanupOutcome> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Vec::new();
        };

        let mut outcomes = Vec::new();
        while let Ok(conn) = rx.try_recv() {
            outcomes.push(self.process(&conn).await);
        }
        outcomes
    }

    /// Confirm a candidate is dead and, if so, evict it.
    pub async fn process(&self, conn: &Arc<ClientConnection>) -> CleanupOutcome {
        if !conn.is_closed() {
            if conn.idle_for() < self.config.grace {
                conn.touch();
                return CleanupOutcome::Recent;
            }

            if conn.probe(self.config.probe_timeout).await {
                return CleanupOutcome::Alive;
            }
        }

        let removed = self.manager.remove(conn).await;
        tracing::info!(
            client_id = %conn.id(),
            kind = %conn.kind(),
            conn_id = %conn.conn_id(),
            last_active = %conn.last_active(),
            removed,
            "Reclaiming stale connection",
        );
        conn.close().await;

        if removed {
            CleanupOutcome::Evicted
        } else {
            CleanupOutcome::Superseded
        }
    }
}
