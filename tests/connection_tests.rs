//! Connection manager lifecycle: health checks, backoff reconnection, callbacks

mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::backing_store::{
    BackingStoreConnection, ConnectionEventKind, ConnectionState, InMemoryStore,
};
use tiercache_core::config::{BackingStoreConfig, CacheSystemConfig};
use tiercache_core::error::CacheError;

fn config_with(max_reconnection_attempts: u32, initial_backoff_ms: u64) -> BackingStoreConfig {
    BackingStoreConfig {
        max_reconnection_attempts,
        initial_backoff_ms,
        ..CacheSystemConfig::for_test().backing_store
    }
}

fn recorded_kinds(
    connection: &BackingStoreConnection,
) -> Arc<Mutex<Vec<ConnectionEventKind>>> {
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    connection.add_connection_callback(move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().push(event.kind);
        }
    });
    kinds
}

#[tokio::test]
async fn test_health_check_failure_triggers_reconnect() {
    let store = Arc::new(InMemoryStore::new());
    let connection = BackingStoreConnection::new(store.clone(), config_with(10, 20));
    let kinds = recorded_kinds(&connection);
    assert!(connection.connect().await);

    store.set_available(false);
    let observed = connection.clone();
    assert!(wait_until(Duration::from_secs(2), || observed.state() != ConnectionState::Connected).await);
    store.set_available(true);

    let observed = connection.clone();
    assert!(wait_until(Duration::from_secs(3), || observed.is_connected()).await);

    let stats = connection.stats();
    assert!(stats.reconnection_attempts >= 1);
    assert_eq!(stats.consecutive_failures, 0);
    assert!(stats.last_error.is_some());

    let kinds = kinds.lock().clone();
    assert_eq!(kinds.first(), Some(&ConnectionEventKind::Connected));
    assert!(kinds.contains(&ConnectionEventKind::HealthCheckFailed));
    assert_eq!(kinds.last(), Some(&ConnectionEventKind::Reconnected));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_reconnection_stops_after_max_attempts() {
    let store = Arc::new(InMemoryStore::new());
    let connection = BackingStoreConnection::new(store.clone(), config_with(2, 10));
    assert!(connection.connect().await);

    store.set_available(false);
    let observed = connection.clone();
    assert!(
        wait_until(Duration::from_secs(3), || observed.stats().consecutive_failures >= 3).await
    );
    // Give a stray reconnect a chance to show up before asserting it never ran
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = connection.stats();
    assert_eq!(stats.reconnection_attempts, 2);
    assert_eq!(stats.consecutive_failures, 3);
    assert_eq!(stats.failed_connections, 3);
    assert_eq!(stats.total_connections, 3);
    assert_eq!(connection.state(), ConnectionState::Failed);

    // An explicit connect still works once the store is back
    store.set_available(true);
    assert!(connection.connect().await);
    assert_eq!(connection.stats().consecutive_failures, 0);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_failed_initial_connect_schedules_backoff_retries() {
    let store = Arc::new(InMemoryStore::new());
    store.set_available(false);
    let connection = BackingStoreConnection::new(store.clone(), config_with(3, 10));
    let kinds = recorded_kinds(&connection);

    assert!(!connection.connect().await);
    let observed = connection.clone();
    assert!(wait_until(Duration::from_secs(3), || observed.stats().consecutive_failures >= 4).await);

    // initial attempt + 3 scheduled reconnects
    assert_eq!(store.call_counts().connect, 4);
    assert!(kinds
        .lock()
        .iter()
        .all(|kind| *kind == ConnectionEventKind::ConnectFailed));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let store = Arc::new(InMemoryStore::new());
    store.set_available(false);
    let connection = BackingStoreConnection::new(store.clone(), config_with(5, 500));

    assert!(!connection.connect().await);
    connection.disconnect().await;
    store.set_available(true);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connection.stats().reconnection_attempts, 0);
    assert_eq!(store.call_counts().connect, 1);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let connection = BackingStoreConnection::new(store, config_with(3, 10));
    let kinds = recorded_kinds(&connection);

    assert!(connection.connect().await);
    connection.disconnect().await;
    connection.disconnect().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    let disconnects = kinds
        .lock()
        .iter()
        .filter(|kind| **kind == ConnectionEventKind::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_error_callbacks_receive_operation_failures() {
    let store = Arc::new(InMemoryStore::new());
    let connection = BackingStoreConnection::new(store.clone(), config_with(3, 10));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    connection.add_error_callback(move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().push(event.operation);
        }
    });
    assert!(connection.connect().await);

    store.fail_next(1);
    let result = connection
        .execute("GET", |store| async move { store.get("k").await })
        .await;
    assert!(matches!(result, Err(CacheError::BackendError(_))));
    assert_eq!(errors.lock().as_slice(), ["GET".to_string()]);

    // run_connected never connects on the caller's behalf
    connection.disconnect().await;
    let result = connection
        .run_connected("GET", |store| async move { store.get("k").await })
        .await;
    assert!(matches!(result, Err(CacheError::NotConnected { .. })));
    assert_eq!(store.call_counts().get, 1);
}

#[tokio::test]
async fn test_slow_callback_is_bounded_by_timeout() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = config_with(3, 10);
    config.callback_timeout_ms = 50;
    let connection = BackingStoreConnection::new(store, config);
    connection.add_connection_callback(|_| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let started = tokio::time::Instant::now();
    assert!(connection.connect().await);
    assert!(started.elapsed() < Duration::from_secs(2));

    connection.disconnect().await;
}
