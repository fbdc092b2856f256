//! Cooperative cancellation for range queries.
//!
//! A [`Cancellation`] is a cheap clonable handle. The orchestrator checks it
//! before each window, the paginator before each page, and backoff sleeps are
//! raced against it. Nothing is aborted mid-request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Clonable cancellation handle; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

impl Cancellation {
    /// Create a handle in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Wakes every waiter exactly once.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested. Returns immediately if already set.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Spawn a task that cancels this handle on Ctrl+C.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cancel_on_ctrl_c(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - cancelling range query");
                handle.cancel();
            }
        });
    }
}
