//! A cheaply-cloneable cooperative cancellation signal.
//!
//! Threaded into the active provider request, the active tool execution,
//! and the active approval wait. None of those throw across the engine
//! when tripped — they each observe it
//! and return their own "cancelled" outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tripped: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    pub fn new() -> Self {
        CancellationSignal::default()
    }

    /// Trip the signal. Idempotent; wakes any task currently waiting in
    /// [`Self::cancelled`].
    pub fn trip(&self) {
        self.inner.tripped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is tripped. Safe to call repeatedly;
    /// resolves immediately if already tripped.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
