//! Callback-exposed promise: a future whose resolve/reject are directly
//! invocable by something other than the awaiter.
//!
//! Backed by `tokio::sync::oneshot`, which already gives resolve/reject
//! idempotence for free (a second `send` is simply dropped). The
//! `Resolver` side is cloneable so both the pool and a cancellation
//! subscriber can race to settle the same promise.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cancel::{CancelToken, SubscriptionId};
use crate::error::{Error, Result};

struct Inner<T> {
    tx: Mutex<Option<oneshot::Sender<Result<T>>>>,
    unsub: Mutex<Option<(CancelToken, SubscriptionId)>>,
}

/// The producer side of a [`Promise`]. Cloneable; `resolve`/`reject` are
/// idempotent — only the first call settles the promise.
pub struct Resolver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Resolver<T> {
    /// Settle the promise with a value. No-op if already settled.
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Settle the promise with an error. No-op if already settled.
    pub fn reject(&self, err: Error) {
        self.settle(Err(err));
    }

    fn settle(&self, result: Result<T>) {
        let sent = {
            let mut tx = self.inner.tx.lock();
            match tx.take() {
                Some(tx) => {
                    let _ = tx.send(result);
                    true
                }
                None => false,
            }
        };
        if sent {
            if let Some((token, id)) = self.inner.unsub.lock().take() {
                token.off(id);
            }
        }
    }
}

/// The consumer side of a callback-promise. Implements `Future`.
pub struct Promise<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The resolver was dropped without settling — treat as a lost
            // race rather than panicking the awaiter.
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::canceled_generic())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Create a plain callback-promise, with no binding to a cancellation token.
#[must_use]
pub fn promise<T>() -> (Resolver<T>, Promise<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Resolver {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                unsub: Mutex::new(None),
            }),
        },
        Promise { rx },
    )
}

/// Create a callback-promise bound to `token`.
///
/// If `token` is already cancelled, the returned promise is immediately
/// rejected with `err_factory()`'s error (or a generic cancellation
/// error if `err_factory` is `None`). Otherwise a subscription is
/// installed that rejects the promise the moment `token` cancels; the
/// subscription is removed as soon as the promise settles by any means.
pub fn promise_with_cancel<T, E>(token: &CancelToken, err_factory: Option<E>) -> (Resolver<T>, Promise<T>)
where
    T: Send + 'static,
    E: FnOnce() -> Error,
{
    let (resolver, fut) = promise();

    if token.is_canceled() {
        let err = err_factory.map_or_else(|| token.cancel_error(), |f| f());
        resolver.reject(err);
        return (resolver, fut);
    }

    let sub_resolver = resolver.clone();
    let sub_token = token.clone();
    let id = token.on_cancel(move || {
        sub_resolver.reject(sub_token.cancel_error());
    });
    *resolver.inner.unsub.lock() = Some((token.clone(), id));

    (resolver, fut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_then_await_yields_value() {
        let (resolver, fut) = promise::<u32>();
        resolver.resolve(7);
        assert_eq!(fut.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn reject_then_await_yields_error() {
        let (resolver, fut) = promise::<u32>();
        resolver.reject(Error::Closing);
        assert!(matches!(fut.await, Err(Error::Closing)));
    }

    #[tokio::test]
    async fn late_resolve_after_reject_is_a_no_op() {
        let (resolver, fut) = promise::<u32>();
        resolver.reject(Error::Closed);
        resolver.resolve(42);
        assert!(matches!(fut.await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn late_reject_after_resolve_is_a_no_op() {
        let (resolver, fut) = promise::<u32>();
        resolver.resolve(42);
        resolver.reject(Error::Closed);
        assert_eq!(fut.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn already_canceled_token_rejects_immediately() {
        let token = CancelToken::new();
        token.cancel_with_reason("done");
        let (_resolver, fut) = promise_with_cancel::<u32, fn() -> Error>(&token, None);
        let err = fut.await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn cancellation_after_creation_rejects_the_promise() {
        let token = CancelToken::new();
        let (_resolver, fut) = promise_with_cancel::<u32, fn() -> Error>(&token, None);
        token.cancel_with_reason("late");
        let err = fut.await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn resolve_before_cancel_wins_and_unsubscribes() {
        let token = CancelToken::new();
        let (resolver, fut) = promise_with_cancel::<u32, fn() -> Error>(&token, None);
        resolver.resolve(5);
        token.cancel_with_reason("too late");
        assert_eq!(fut.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn custom_err_factory_is_used_for_already_canceled_token() {
        let token = CancelToken::new();
        token.cancel();
        let (_resolver, fut) =
            promise_with_cancel::<u32, _>(&token, Some(|| Error::canceled("custom")));
        match fut.await {
            Err(Error::Canceled { reason }) => assert_eq!(reason, "custom"),
            other => panic!("expected Canceled, got {other:?}"),
        }
    }
}
