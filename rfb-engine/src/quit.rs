//! The per-connection quit signal.
//!
//! Both multiplexer tasks observe this signal and exit when it is raised.
//! Raising is idempotent: the first caller wins, later calls are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cloneable, idempotent shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    notify: Notify,
}

impl QuitSignal {
    /// Create a fresh, unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal, waking all waiters. Safe to call repeatedly;
    /// returns `true` only for the call that actually raised it, which is
    /// how fatal errors get reported exactly once.
    pub fn raise(&self) -> bool {
        let first = !self.inner.raised.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Whether the signal has been raised.
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Wait until the signal is raised. Returns immediately if it already
    /// was.
    pub async fn wait(&self) {
        while !self.is_raised() {
            let notified = self.inner.notify.notified();
            if self.is_raised() {
                break;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raise_is_idempotent() {
        let quit = QuitSignal::new();
        assert!(!quit.is_raised());
        assert!(quit.raise());
        assert!(!quit.raise());
        assert!(quit.is_raised());
        // Waiting after the fact returns immediately.
        quit.wait().await;
    }

    #[tokio::test]
    async fn wakes_waiters() {
        let quit = QuitSignal::new();
        let waiter = {
            let quit = quit.clone();
            tokio::spawn(async move {
                quit.wait().await;
            })
        };
        tokio::task::yield_now().await;
        quit.raise();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
