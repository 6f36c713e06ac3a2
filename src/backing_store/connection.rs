//! # Backing Store Connection Manager
//!
//! Owns the single logical connection to the shared key-value store and keeps
//! it alive: connect with PING verification, a periodic health check, and
//! exponential-backoff reconnection after failures.
//!
//! ## State machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!                                 │                  │ health check fails
//!                                 ▼ err              ▼
//!                               Failed ◀─────────────┘
//!                                 │ backoff elapsed (while attempts remain)
//!                                 ▼
//!                            Reconnecting ──connect()──▶ Connecting ...
//! ```
//!
//! Transitions are serialized by an async transition lock; the current state is
//! mirrored in an atomic so readers never wait. Connection failures are never
//! fatal: they degrade to `Failed` and are retried in the background until
//! `max_reconnection_attempts` consecutive failures, after which only an
//! explicit `connect()` restarts the cycle.

use crate::backing_store::traits::BackingStore;
use crate::config::BackingStoreConfig;
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, CacheEventPublisher};
use crate::logging::log_connection_event;
use crate::utils::{BackgroundTasks, ShutdownSignal};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Failed = 4,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Connection counters, mutated only by the connection manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub reconnection_attempts: u64,
    pub consecutive_failures: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// What happened to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    Connected,
    /// Connected again after one or more failures
    Reconnected,
    ConnectFailed,
    /// A health check PING failed on an established connection
    HealthCheckFailed,
    Disconnected,
}

/// Payload delivered to connection callbacks
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    pub state: ConnectionState,
    pub error: Option<String>,
    pub consecutive_failures: u32,
}

impl ConnectionEvent {
    pub fn success(&self) -> bool {
        matches!(
            self.kind,
            ConnectionEventKind::Connected | ConnectionEventKind::Reconnected
        )
    }
}

/// Payload delivered to error callbacks
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub operation: String,
    pub error: String,
}

pub type ConnectionCallback = Arc<dyn Fn(ConnectionEvent) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(ErrorEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Connection manager for one backing store instance
pub struct BackingStoreConnection {
    store: Arc<dyn BackingStore>,
    config: BackingStoreConfig,
    state: AtomicU8,
    transition_lock: tokio::sync::Mutex<()>,
    stats: Mutex<ConnectionStats>,
    connection_callbacks: RwLock<Vec<ConnectionCallback>>,
    error_callbacks: RwLock<Vec<ErrorCallback>>,
    shutdown: Mutex<ShutdownSignal>,
    tasks: BackgroundTasks,
    health_loop_running: AtomicBool,
    reconnect_scheduled: AtomicBool,
    events: CacheEventPublisher,
    self_ref: Weak<BackingStoreConnection>,
}

impl std::fmt::Debug for BackingStoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingStoreConnection")
            .field("provider", &self.store.provider_name())
            .field("state", &self.state())
            .field("connection_callbacks", &self.connection_callbacks.read().len())
            .field("error_callbacks", &self.error_callbacks.read().len())
            .finish()
    }
}

impl BackingStoreConnection {
    pub fn new(store: Arc<dyn BackingStore>, config: BackingStoreConfig) -> Arc<Self> {
        Self::with_events(store, config, CacheEventPublisher::default())
    }

    /// Create a connection manager that publishes state changes to `events`
    pub fn with_events(
        store: Arc<dyn BackingStore>,
        config: BackingStoreConfig,
        events: CacheEventPublisher,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            transition_lock: tokio::sync::Mutex::new(()),
            stats: Mutex::new(ConnectionStats::default()),
            connection_callbacks: RwLock::new(Vec::new()),
            error_callbacks: RwLock::new(Vec::new()),
            shutdown: Mutex::new(ShutdownSignal::new()),
            tasks: BackgroundTasks::new("backing_store_connection"),
            health_loop_running: AtomicBool::new(false),
            reconnect_scheduled: AtomicBool::new(false),
            events,
            self_ref: self_ref.clone(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of connection counters
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    pub fn provider_name(&self) -> &'static str {
        self.store.provider_name()
    }

    pub fn config(&self) -> &BackingStoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Register a callback for connection state changes
    pub fn add_connection_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(ConnectionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ConnectionCallback = Arc::new(move |event| callback(event).boxed());
        self.connection_callbacks.write().push(callback);
    }

    /// Register a callback for operation and connection errors
    pub fn add_error_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(ErrorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ErrorCallback = Arc::new(move |event| callback(event).boxed());
        self.error_callbacks.write().push(callback);
    }

    /// Connect to the backing store and verify the connection with PING.
    ///
    /// Returns `true` without doing anything when already connected or while
    /// another connect is in flight.
    pub async fn connect(&self) -> bool {
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return true;
        }

        let (previous, result, consecutive_failures) = {
            let _transition = self.transition_lock.lock().await;
            let previous = self.state();
            if previous == ConnectionState::Connected {
                return true;
            }

            self.transition(ConnectionState::Connecting);
            self.stats.lock().total_connections += 1;

            let result = self.establish().await;

            let consecutive_failures = {
                let mut stats = self.stats.lock();
                match &result {
                    Ok(()) => {
                        stats.successful_connections += 1;
                        stats.consecutive_failures = 0;
                        stats.last_connected_at = Some(Utc::now());
                    }
                    Err(e) => {
                        stats.failed_connections += 1;
                        stats.consecutive_failures += 1;
                        stats.last_error_at = Some(Utc::now());
                        stats.last_error = Some(e.to_string());
                    }
                }
                stats.consecutive_failures
            };

            self.transition(if result.is_ok() {
                ConnectionState::Connected
            } else {
                ConnectionState::Failed
            });

            (previous, result, consecutive_failures)
        };

        match result {
            Ok(()) => {
                let kind = if previous == ConnectionState::Reconnecting
                    || previous == ConnectionState::Failed
                {
                    ConnectionEventKind::Reconnected
                } else {
                    ConnectionEventKind::Connected
                };

                info!(
                    provider = self.provider_name(),
                    reconnected = kind == ConnectionEventKind::Reconnected,
                    "✅ Backing store connected"
                );
                log_connection_event("connected", ConnectionState::Connected, 0, None);

                self.start_health_loop();
                self.notify_connection(ConnectionEvent {
                    kind,
                    state: ConnectionState::Connected,
                    error: None,
                    consecutive_failures: 0,
                })
                .await;
                true
            }
            Err(e) => {
                self.after_failure(ConnectionEventKind::ConnectFailed, "connect", e, consecutive_failures)
                    .await;
                false
            }
        }
    }

    /// Stop background work, close the handle, and move to `Disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        let signal = self.shutdown.lock().clone();
        signal.trigger();
        self.tasks
            .join_all(self.config.callback_timeout() + self.config.socket_timeout())
            .await;

        let previous = {
            let _transition = self.transition_lock.lock().await;
            let previous = self.state();

            if let Err(e) = self.store.disconnect().await {
                warn!(provider = self.provider_name(), error = %e, "Error while closing backing store handle");
            }

            self.transition(ConnectionState::Disconnected);
            self.health_loop_running.store(false, Ordering::SeqCst);
            self.reconnect_scheduled.store(false, Ordering::SeqCst);
            *self.shutdown.lock() = ShutdownSignal::new();
            previous
        };

        if previous != ConnectionState::Disconnected {
            info!(provider = self.provider_name(), "🛑 Backing store disconnected");
            log_connection_event("disconnected", ConnectionState::Disconnected, 0, None);
            let consecutive_failures = self.stats.lock().consecutive_failures;
            self.notify_connection(ConnectionEvent {
                kind: ConnectionEventKind::Disconnected,
                state: ConnectionState::Disconnected,
                error: None,
                consecutive_failures,
            })
            .await;
        }
    }

    /// Run an operation against the live store, connecting first if needed.
    ///
    /// The operation is bounded by `socket_timeout`; a timeout surfaces as
    /// [`CacheError::Timeout`].
    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> CacheResult<T>
    where
        F: FnOnce(Arc<dyn BackingStore>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.ensure_connected().await?;
        self.run_bounded(operation, op).await
    }

    /// Run an operation only if the connection is already up.
    ///
    /// Never attempts a connect on the caller's path; returns
    /// [`CacheError::NotConnected`] instead.
    pub async fn run_connected<T, F, Fut>(&self, operation: &str, op: F) -> CacheResult<T>
    where
        F: FnOnce(Arc<dyn BackingStore>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        if !self.is_connected() {
            return Err(CacheError::NotConnected {
                state: self.state().to_string(),
            });
        }
        self.run_bounded(operation, op).await
    }

    async fn run_bounded<T, F, Fut>(&self, operation: &str, op: F) -> CacheResult<T>
    where
        F: FnOnce(Arc<dyn BackingStore>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let timeout = self.config.socket_timeout();
        let result = match tokio::time::timeout(timeout, op(self.store.clone())).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::timeout(operation, timeout)),
        };

        if let Err(e) = &result {
            debug!(operation = operation, error = %e, "Backing store operation failed");
            self.notify_error(operation, e).await;
        }
        result
    }

    /// Like [`execute`](Self::execute), but runs `fallback` instead of returning
    /// an error when the store is unreachable or the operation fails.
    pub async fn execute_with_fallback<T, F, Fut, FB, FbFut>(
        &self,
        operation: &str,
        op: F,
        fallback: FB,
    ) -> CacheResult<T>
    where
        F: FnOnce(Arc<dyn BackingStore>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = CacheResult<T>>,
    {
        match self.execute(operation, op).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(operation = operation, error = %e, "Backing store operation failed, using fallback");
                fallback().await
            }
        }
    }

    async fn ensure_connected(&self) -> CacheResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect().await;
        if self.is_connected() {
            Ok(())
        } else {
            Err(CacheError::NotConnected {
                state: self.state().to_string(),
            })
        }
    }

    async fn establish(&self) -> CacheResult<()> {
        let connect_timeout = self.config.socket_connect_timeout();
        match tokio::time::timeout(connect_timeout, self.store.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(CacheError::timeout("connect", connect_timeout)),
        }
        self.ping_with_timeout().await
    }

    async fn ping_with_timeout(&self) -> CacheResult<()> {
        let timeout = self.config.socket_timeout();
        match tokio::time::timeout(timeout, self.store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::timeout("ping", timeout)),
        }
    }

    fn transition(&self, to: ConnectionState) -> ConnectionState {
        let from = ConnectionState::from(self.state.swap(to as u8, Ordering::SeqCst));
        if from != to {
            debug!(from = %from, to = %to, "Connection state transition");
            self.events
                .publish(CacheEvent::ConnectionStateChanged { from, to });
        }
        from
    }

    /// Notifications and reconnection scheduling shared by failed connects and failed health checks
    async fn after_failure(
        &self,
        kind: ConnectionEventKind,
        operation: &str,
        error: CacheError,
        consecutive_failures: u32,
    ) {
        error!(
            provider = self.provider_name(),
            operation = operation,
            consecutive_failures = consecutive_failures,
            error = %error,
            "❌ Backing store connection failure"
        );
        let message = error.to_string();
        log_connection_event(
            operation,
            ConnectionState::Failed,
            consecutive_failures,
            Some(&message),
        );

        self.notify_connection(ConnectionEvent {
            kind,
            state: ConnectionState::Failed,
            error: Some(message),
            consecutive_failures,
        })
        .await;
        self.notify_error(operation, &error).await;

        if consecutive_failures <= self.config.max_reconnection_attempts {
            self.schedule_reconnect(consecutive_failures);
        } else {
            warn!(
                provider = self.provider_name(),
                consecutive_failures = consecutive_failures,
                max_reconnection_attempts = self.config.max_reconnection_attempts,
                "Reconnection attempts exhausted, waiting for an explicit connect"
            );
        }
    }

    fn schedule_reconnect(&self, consecutive_failures: u32) {
        let signal = self.shutdown.lock().clone();
        if signal.is_triggered() {
            return;
        }
        if self.reconnect_scheduled.swap(true, Ordering::SeqCst) {
            debug!("Reconnection already scheduled");
            return;
        }

        let backoff = self.config.backoff_for(consecutive_failures);
        info!(
            provider = self.provider_name(),
            backoff_ms = backoff.as_millis() as u64,
            consecutive_failures = consecutive_failures,
            "🔄 Scheduling backing store reconnection"
        );

        let weak = self.self_ref.clone();
        self.tasks.spawn("reconnect", async move {
            let proceed = signal.sleep(backoff).await;
            let Some(connection) = weak.upgrade() else {
                return;
            };
            connection.reconnect_scheduled.store(false, Ordering::SeqCst);
            if !proceed {
                return;
            }
            connection.reconnect().await;
        });
    }

    async fn reconnect(&self) {
        {
            let _transition = self.transition_lock.lock().await;
            if matches!(
                self.state(),
                ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Disconnected
            ) {
                debug!(state = %self.state(), "Skipping scheduled reconnection");
                return;
            }
            self.transition(ConnectionState::Reconnecting);
            self.stats.lock().reconnection_attempts += 1;
        }
        self.connect().await;
    }

    fn start_health_loop(&self) {
        let signal = self.shutdown.lock().clone();
        if signal.is_triggered() {
            return;
        }
        if self
            .health_loop_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let interval = self.config.health_check_interval();
        let weak = self.self_ref.clone();
        self.tasks.spawn("health_check", async move {
            while signal.sleep(interval).await {
                let Some(connection) = weak.upgrade() else {
                    return;
                };
                if connection.state() != ConnectionState::Connected {
                    break;
                }
                if let Err(e) = connection.ping_with_timeout().await {
                    connection.health_loop_running.store(false, Ordering::SeqCst);
                    connection.on_health_check_failure(e).await;
                    return;
                }
            }
            if let Some(connection) = weak.upgrade() {
                connection.health_loop_running.store(false, Ordering::SeqCst);
            }
            debug!("Health check loop stopped");
        });
    }

    async fn on_health_check_failure(&self, error: CacheError) {
        let consecutive_failures = {
            let _transition = self.transition_lock.lock().await;
            if self.state() != ConnectionState::Connected {
                return;
            }

            let consecutive_failures = {
                let mut stats = self.stats.lock();
                stats.failed_connections += 1;
                stats.consecutive_failures += 1;
                stats.last_error_at = Some(Utc::now());
                stats.last_error = Some(error.to_string());
                stats.consecutive_failures
            };

            self.transition(ConnectionState::Failed);
            consecutive_failures
        };

        self.after_failure(
            ConnectionEventKind::HealthCheckFailed,
            "health_check",
            error,
            consecutive_failures,
        )
        .await;
    }

    async fn notify_connection(&self, event: ConnectionEvent) {
        let callbacks = self.connection_callbacks.read().clone();
        dispatch("connection", callbacks, event, self.config.callback_timeout()).await;
    }

    async fn notify_error(&self, operation: &str, error: &CacheError) {
        let callbacks = self.error_callbacks.read().clone();
        let event = ErrorEvent {
            operation: operation.to_string(),
            error: error.to_string(),
        };
        dispatch("error", callbacks, event, self.config.callback_timeout()).await;
    }
}

/// Run every callback as its own task with a timeout; panics and timeouts are logged
async fn dispatch<E>(
    kind: &'static str,
    callbacks: Vec<Arc<dyn Fn(E) -> BoxFuture<'static, ()> + Send + Sync>>,
    event: E,
    timeout: Duration,
) where
    E: Clone + Send + 'static,
{
    if callbacks.is_empty() {
        return;
    }

    let handles: Vec<_> = callbacks
        .into_iter()
        .map(|callback| {
            let event = event.clone();
            tokio::spawn(async move { tokio::time::timeout(timeout, callback(event)).await })
        })
        .collect();

    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!(
                callback_kind = kind,
                callback_index = index,
                timeout_ms = timeout.as_millis() as u64,
                "Callback timed out"
            ),
            Err(join_error) if join_error.is_panic() => error!(
                callback_kind = kind,
                callback_index = index,
                "Callback panicked"
            ),
            Err(join_error) => warn!(
                callback_kind = kind,
                callback_index = index,
                error = %join_error,
                "Callback task cancelled"
            ),
        }
    }
}
