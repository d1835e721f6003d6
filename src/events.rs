//! The pool's single public event: `error`.
//!
//! The pool emits exactly one kind of event — a factory failure tagged
//! with the action that produced it — matching the `(action, reason)`
//! signature this design calls for. Built on `tokio::sync::broadcast`,
//! the same way the wider event bus this is descended from works, just
//! narrowed to one event type.

use tokio::sync::broadcast;

use crate::error::{Action, Error};

/// A factory failure observed by the pool. Never surfaced through
/// `get`/`release` — only through [`ErrorBus::subscribe`].
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Which factory operation failed.
    pub action: Action,
    /// The error it failed with, rendered to a string since `Error` is
    /// not `Clone` (its `Factory` variant carries a boxed source).
    pub reason: String,
}

impl ErrorEvent {
    pub(crate) fn new(action: Action, err: &Error) -> Self {
        Self {
            action,
            reason: err.to_string(),
        }
    }
}

/// Broadcast bus for the pool's `error` event.
///
/// Emission is fire-and-forget: with no subscribers, or a full channel,
/// the event is silently dropped — there is no backpressure on the pool.
pub struct ErrorBus {
    sender: broadcast::Sender<ErrorEvent>,
}

impl ErrorBus {
    /// Create a new bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an error event to all current subscribers.
    pub fn emit(&self, action: Action, err: &Error) {
        let _ = self.sender.send(ErrorEvent::new(action, err));
    }

    /// Subscribe to `error` events emitted from this point forward.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.sender.subscribe()
    }
}

impl Default for ErrorBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for ErrorBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_creates_bus_with_1024_buffer() {
        let bus = ErrorBus::default();
        let _rx = bus.subscribe();
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = ErrorBus::new(16);
        bus.emit(Action::Create, &Error::Closing);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = ErrorBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(Action::Destroy, &Error::factory(Action::Destroy, "boom".into()));

        let event = rx.recv().await.expect("should receive event");
        assert_eq!(event.action, Action::Destroy);
        assert!(event.reason.contains("boom"));
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = ErrorBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(Action::Reset, &Error::factory(Action::Reset, "nope".into()));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();

        assert_eq!(e1.action, Action::Reset);
        assert_eq!(e2.action, Action::Reset);
    }
}
