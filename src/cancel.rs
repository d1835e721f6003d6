//! Cancellation token: a one-shot signal with subscribers.
//!
//! `tokio_util::sync::CancellationToken` gives a `cancelled()` future but
//! no way to register and later unregister a plain callback, which the
//! pool's wait-queue needs in order to splice a waiter out of the queue
//! the instant its caller cancels. This is a small bespoke primitive
//! instead, grounded in the subscriber-list shape of
//! `nebula-resilience`'s cancellation context but with an explicit
//! subscribe/unsubscribe surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Error;

/// Handle returned by [`CancelToken::on_cancel`], usable with
/// [`CancelToken::off`] to remove the subscriber before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct State {
    canceled: bool,
    reason: Option<String>,
    subscribers: HashMap<u64, Box<dyn FnOnce() + Send>>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    next_id: AtomicU64,
}

/// A one-shot cancellation signal, cloneable and shareable across tasks.
///
/// Cancelling is idempotent: only the first `cancel`/`cancel_with_reason`
/// call has effect, every subscriber fires exactly once, and
/// `is_canceled` becomes permanently true.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    canceled: false,
                    reason: None,
                    subscribers: HashMap::new(),
                }),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// True once this token has been cancelled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.state.lock().canceled
    }

    /// Build the tagged cancellation error for this token's current (or
    /// eventual) reason.
    #[must_use]
    pub fn cancel_error(&self) -> Error {
        match self.inner.state.lock().reason.clone() {
            Some(reason) => Error::canceled(reason),
            None => Error::canceled_generic(),
        }
    }

    /// Cancel with a generic reason. A no-op if already cancelled.
    pub fn cancel(&self) {
        self.cancel_with_reason("context canceled");
    }

    /// Cancel with an explicit reason. A no-op if already cancelled.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        let subscribers: Vec<Box<dyn FnOnce() + Send>> = {
            let mut state = self.inner.state.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
            state.reason = Some(reason.into());
            state.subscribers.drain().map(|(_, f)| f).collect()
        };
        self.inner.notify.notify_waiters();
        for f in subscribers {
            f();
        }
    }

    /// Register `f` to run once, the moment this token is cancelled.
    ///
    /// If the token is already cancelled, `f` runs immediately (inline)
    /// and the returned id is inert — there is nothing left to `off`.
    pub fn on_cancel<F>(&self, f: F) -> SubscriptionId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock();
            if state.canceled {
                drop(state);
                f();
                return SubscriptionId(id);
            }
            state.subscribers.insert(id, Box::new(f));
        }
        SubscriptionId(id)
    }

    /// Remove a subscriber registered via `on_cancel`, if it has not
    /// already fired. Safe to call more than once.
    pub fn off(&self, id: SubscriptionId) {
        self.inner.state.lock().subscribers.remove(&id.0);
    }

    /// Resolves once this token is cancelled. Resolves immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        if self.is_canceled() {
            return;
        }
        // Re-check after registering for notification to close the race
        // against a `cancel()` that ran between the check above and here.
        loop {
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
            if self.is_canceled() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CancelToken")
            .field("canceled", &state.canceled)
            .field("reason", &state.reason)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn fresh_token_is_not_canceled() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
    }

    #[test]
    fn cancel_is_idempotent_and_keeps_first_reason() {
        let token = CancelToken::new();
        token.cancel_with_reason("first");
        token.cancel_with_reason("second");
        assert!(token.is_canceled());
        assert_eq!(token.cancel_error().to_string(), "request canceled: first");
    }

    #[test]
    fn on_cancel_fires_for_already_canceled_token() {
        let token = CancelToken::new();
        token.cancel();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_c = fired.clone();
        token.on_cancel(move || fired_c.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn on_cancel_fires_when_cancel_happens_later() {
        let token = CancelToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_c = fired.clone();
        token.on_cancel(move || fired_c.store(true, Ordering::SeqCst));
        assert!(!fired.load(Ordering::SeqCst));
        token.cancel();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn off_prevents_a_pending_subscriber_from_firing() {
        let token = CancelToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_c = fired.clone();
        let id = token.on_cancel(move || fired_c.store(true, Ordering::SeqCst));
        token.off(id);
        token.cancel();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_canceled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled())
            .await
            .expect("should not time out");
    }
}
