//! Bounded waiter: race a future against a timeout, deadline, or
//! cancellation token.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// What a bounded wait races against.
pub enum Bound {
    /// A relative duration in milliseconds. `<= 0` expires immediately.
    Millis(i64),
    /// An absolute instant. Already-past deadlines expire immediately.
    Deadline(Instant),
    /// A cancellation token. Already-cancelled tokens expire immediately.
    Token(CancelToken),
}

impl Bound {
    fn remaining(&self) -> Option<Duration> {
        match self {
            Bound::Millis(ms) => {
                if *ms <= 0 {
                    None
                } else {
                    Some(Duration::from_millis(*ms as u64))
                }
            }
            Bound::Deadline(deadline) => {
                let now = Instant::now();
                if *deadline <= now {
                    None
                } else {
                    Some(*deadline - now)
                }
            }
            Bound::Token(_) => None,
        }
    }
}

/// Race `fut` against `bound`. Resolves with `fut`'s value if it finishes
/// first; otherwise fails with a cancellation or timeout error. `fut`
/// itself is never cancelled — it keeps running to completion in the
/// background, but its eventual result is discarded.
pub async fn limit<F, T>(fut: F, bound: Bound) -> Result<T>
where
    F: Future<Output = T>,
{
    if let Bound::Token(token) = &bound {
        if token.is_canceled() {
            return Err(token.cancel_error());
        }
    }

    match bound {
        Bound::Token(token) => {
            tokio::select! {
                v = fut => Ok(v),
                () = token.cancelled() => Err(token.cancel_error()),
            }
        }
        other => match other.remaining() {
            None => Err(Error::TimedOut),
            Some(remaining) => {
                tokio::select! {
                    v = fut => Ok(v),
                    () = tokio::time::sleep(remaining) => Err(Error::TimedOut),
                }
            }
        },
    }
}

/// Resolve after `bound` elapses or cancels, whichever is first. Negative
/// durations, past deadlines, and already-cancelled/non-cancellable
/// tokens resolve immediately.
pub async fn wait(bound: Bound) {
    match bound {
        Bound::Token(token) => {
            if !token.is_canceled() {
                token.cancelled().await;
            }
        }
        other => {
            if let Some(remaining) = other.remaining() {
                tokio::time::sleep(remaining).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn limit_resolves_with_value_when_faster_than_bound() {
        let result = limit(async { 42 }, Bound::Millis(1000)).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn limit_rejects_immediately_for_non_positive_millis() {
        let result = limit(async { 42u32 }, Bound::Millis(0)).await;
        assert!(matches!(result, Err(Error::TimedOut)));

        let result = limit(async { 42u32 }, Bound::Millis(-5)).await;
        assert!(matches!(result, Err(Error::TimedOut)));
    }

    #[tokio::test]
    async fn limit_times_out_before_slow_future_resolves() {
        let result = limit(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                42u32
            },
            Bound::Millis(10),
        )
        .await;
        assert!(matches!(result, Err(Error::TimedOut)));
    }

    #[tokio::test]
    async fn limit_rejects_on_already_canceled_token() {
        let token = CancelToken::new();
        token.cancel_with_reason("nope");
        let result = limit(async { 42u32 }, Bound::Token(token)).await;
        assert!(result.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn limit_rejects_when_token_cancels_mid_wait() {
        let token = CancelToken::new();
        let waiter_token = token.clone();
        let handle = tokio::spawn(async move {
            limit(
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    42u32
                },
                Bound::Token(waiter_token),
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let result = handle.await.unwrap();
        assert!(result.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn wait_resolves_immediately_for_non_positive_millis() {
        let start = Instant::now();
        wait(Bound::Millis(0)).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_resolves_after_duration() {
        let start = Instant::now();
        wait(Bound::Millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn wait_resolves_immediately_for_past_deadline() {
        let start = Instant::now();
        wait(Bound::Deadline(Instant::now() - Duration::from_secs(1))).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_resolves_on_cancel() {
        let token = CancelToken::new();
        let waiter_token = token.clone();
        let handle = tokio::spawn(async move {
            wait(Bound::Token(waiter_token)).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
