//! Integration tests for `WsManager`.
//!
//! These exercise the connection registry directly with in-memory
//! transports: keyed insertion, identity-checked removal, stale scans, stats
//! and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{age, recorded_connection};
use octohub_api::ws::manager::STATS_DETAIL_LIMIT;
use octohub_api::ws::WsManager;
use octohub_core::types::ClientKind;

// ---------------------------------------------------------------------------
// Test: new manager starts with zero connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_manager_has_zero_connections() {
    let manager = WsManager::new();

    assert_eq!(manager.connection_count().await, 0);
    let stats = manager.stats().await;
    assert_eq!(stats.total_connections, 0);
}

// ---------------------------------------------------------------------------
// Test: add() registers under (kind, id)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_registers_connection_under_its_key() {
    let manager = WsManager::new();
    let (conn, _rx, _t) = recorded_connection("user123", ClientKind::User, 8);

    assert!(manager.add(Arc::clone(&conn)).await.is_none());

    assert_eq!(manager.connection_count().await, 1);
    let found = manager.get(ClientKind::User, "user123").await.unwrap();
    assert!(Arc::ptr_eq(&found, &conn));
    assert!(!manager.contains(ClientKind::Node, "user123").await);
}

// ---------------------------------------------------------------------------
// Test: the same id in different classes are distinct connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_id_in_both_classes_coexists() {
    let manager = WsManager::new();
    let (user, _r1, _t1) = recorded_connection("a1", ClientKind::User, 8);
    let (node, _r2, _t2) = recorded_connection("a1", ClientKind::Node, 8);

    manager.add(user).await;
    assert!(manager.add(node).await.is_none());

    let stats = manager.stats().await;
    assert_eq!(stats.user_connections, 1);
    assert_eq!(stats.node_connections, 1);
    assert_eq!(stats.total_connections, 2);
}

// ---------------------------------------------------------------------------
// Test: a second add() under the same key displaces the first
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_displaces_previous_connection() {
    let manager = WsManager::new();
    let (first, _r1, t1) = recorded_connection("user123", ClientKind::User, 8);
    let (second, _r2, _t2) = recorded_connection("user123", ClientKind::User, 8);

    manager.add(Arc::clone(&first)).await;
    let displaced = manager.add(Arc::clone(&second)).await.unwrap();

    assert!(Arc::ptr_eq(&displaced, &first));
    // The registry hands the old connection back untouched.
    assert!(!t1.is_closed());
    assert_eq!(manager.connection_count().await, 1);
    let current = manager.get(ClientKind::User, "user123").await.unwrap();
    assert!(Arc::ptr_eq(&current, &second));
}

// ---------------------------------------------------------------------------
// Test: remove() of a superseded connection leaves the replacement alone
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_is_identity_checked() {
    let manager = WsManager::new();
    let (first, _r1, _t1) = recorded_connection("user123", ClientKind::User, 8);
    let (second, _r2, _t2) = recorded_connection("user123", ClientKind::User, 8);

    manager.add(Arc::clone(&first)).await;
    manager.add(Arc::clone(&second)).await;

    assert!(!manager.remove(&first).await);
    assert!(manager.contains(ClientKind::User, "user123").await);

    assert!(manager.remove(&second).await);
    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: remove() of an unknown connection is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_unknown_connection_is_noop() {
    let manager = WsManager::new();
    let (registered, _r1, _t1) = recorded_connection("n1", ClientKind::Node, 8);
    let (stranger, _r2, _t2) = recorded_connection("n2", ClientKind::Node, 8);

    manager.add(registered).await;

    assert!(!manager.remove(&stranger).await);
    assert_eq!(manager.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: stale_connections() only returns long-idle connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_scan_selects_only_idle_connections() {
    let manager = WsManager::new();
    let (fresh, _r1, _t1) = recorded_connection("fresh", ClientKind::User, 8);
    let (idle, _r2, _t2) = recorded_connection("idle", ClientKind::Node, 8);
    age(&idle, Duration::from_secs(600));

    manager.add(fresh).await;
    manager.add(Arc::clone(&idle)).await;

    let stale = manager.stale_connections(Duration::from_secs(120)).await;
    assert_eq!(stale.len(), 1);
    assert!(Arc::ptr_eq(&stale[0], &idle));

    // Scanning never removes anything.
    assert_eq!(manager.connection_count().await, 2);
}

// ---------------------------------------------------------------------------
// Test: stats() lists per-connection detail for small classes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_include_details_for_small_classes() {
    let manager = WsManager::new();
    let (conn, _rx, _t) = recorded_connection("user123", ClientKind::User, 8);
    age(&conn, Duration::from_secs(30));
    manager.add(conn).await;

    let stats = manager.stats().await;
    let users = stats.user_details.expect("user details listed");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, "user123");
    assert!(users[0].duration >= 30.0);
    assert_eq!(stats.node_details.map(|d| d.len()), Some(0));
}

// ---------------------------------------------------------------------------
// Test: stats() omits detail once a class exceeds the limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_omit_details_for_large_classes() {
    let manager = WsManager::new();
    let mut receivers = Vec::new();
    for i in 0..=STATS_DETAIL_LIMIT {
        let (conn, rx, _t) = recorded_connection(&format!("user-{i}"), ClientKind::User, 1);
        receivers.push(rx);
        manager.add(conn).await;
    }

    let stats = manager.stats().await;
    assert_eq!(stats.user_connections, STATS_DETAIL_LIMIT + 1);
    assert!(stats.user_details.is_none());
    assert!(stats.node_details.is_some());
}

// ---------------------------------------------------------------------------
// Test: shutdown_all() empties the registry and signals every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_signals_and_clears() {
    let manager = WsManager::new();
    let (user, _r1, _t1) = recorded_connection("u", ClientKind::User, 8);
    let (node, _r2, _t2) = recorded_connection("n", ClientKind::Node, 8);
    manager.add(Arc::clone(&user)).await;
    manager.add(Arc::clone(&node)).await;

    assert_eq!(manager.shutdown_all().await, 2);

    assert_eq!(manager.connection_count().await, 0);
    assert!(user.is_closed());
    assert!(node.is_closed());
}
