//! Cooperative shutdown for background loops.
//!
//! Every long-lived loop owned by a component (health checks, reconnection,
//! L1 sweeps, warmup execution, pattern analysis) sleeps through
//! [`ShutdownSignal::sleep`] so a stop request is observed within one sleep
//! interval. Join handles are kept in a [`BackgroundTasks`] set and joined on
//! shutdown instead of being detached.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct SignalInner {
    triggered: AtomicBool,
    notify: Notify,
}

/// Cloneable one-shot stop flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Wakes every current waiter; later waiters return immediately.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent trigger is not lost
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` when the full duration elapsed and the loop should keep going.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_triggered(),
            _ = self.wait() => false,
        }
    }
}

/// Supervised set of background tasks owned by one component
#[derive(Debug)]
pub struct BackgroundTasks {
    owner: &'static str,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl BackgroundTasks {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a named task into the set
    pub fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(owner = self.owner, task = %name, "Spawning background task");
        let handle = tokio::spawn(future);

        let mut handles = self.handles.lock();
        handles.retain(|(_, h)| !h.is_finished());
        handles.push((name, handle));
    }

    /// Number of tasks that have not finished yet
    pub fn active_count(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|(_, h)| !h.is_finished());
        handles.len()
    }

    /// Wait for every task to finish, aborting any that overrun `timeout`.
    ///
    /// Tasks spawned while joining (for example a loop that starts another loop
    /// on its way out) are joined as well.
    pub async fn join_all(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let drained: Vec<(String, JoinHandle<()>)> = std::mem::take(&mut *self.handles.lock());
            if drained.is_empty() {
                return;
            }

            for (name, mut handle) in drained {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(join_error)) if join_error.is_panic() => {
                        warn!(owner = self.owner, task = %name, "Background task panicked");
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        warn!(
                            owner = self.owner,
                            task = %name,
                            "Background task did not stop in time, aborting"
                        );
                        handle.abort();
                    }
                }
            }
        }
    }

    /// Abort every task without waiting
    pub fn abort_all(&self) {
        for (_, handle) in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for (_, handle) in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}
