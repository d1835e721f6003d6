//! Error types for the pool.
//!
//! A single `thiserror`-derived enum, in the shape this codebase uses
//! elsewhere: structured variants, a `#[source]` slot for the caller's
//! factory error, and small predicate methods downstream code uses
//! instead of matching on variants directly.

use std::fmt;

use thiserror::Error;

/// Result type used throughout the pool.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by a caller-supplied `Factory`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The pool operation a `Factory` error occurred during.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// `Factory::create` failed.
    Create,
    /// `Factory::destroy` failed.
    Destroy,
    /// `Factory::reset` failed.
    Reset,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Destroy => "destroy",
            Action::Reset => "reset",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by pool operations.
///
/// `get`/`release` never propagate factory errors directly — those are
/// routed through the pool's `error` event instead. Only transport-level
/// failures (`Canceled`, `Closing`, `Closed`, `OptionInvalid`) are
/// returned from the public API.
#[derive(Error, Debug)]
pub enum Error {
    /// The request was cancelled by its token before an item became available.
    #[error("request canceled: {reason}")]
    Canceled {
        /// Human-readable cancellation reason.
        reason: String,
    },

    /// A bounded wait (`limit`) elapsed before the race finished.
    #[error("operation timed out")]
    TimedOut,

    /// The pool is in the process of closing; no new work is accepted.
    #[error("pool is closing")]
    Closing,

    /// The pool has fully closed.
    #[error("pool is closed")]
    Closed,

    /// `set_options` was called with a disallowed value.
    #[error("invalid pool option {field}: {reason}")]
    OptionInvalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A `Factory` call failed. Carried internally for the `error` event;
    /// never returned from `get`/`release`.
    #[error("factory {action} failed: {source}")]
    Factory {
        /// Which factory operation failed.
        action: Action,
        /// The underlying error from the factory.
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Build a generic cancellation error (no caller-supplied reason).
    #[must_use]
    pub fn canceled_generic() -> Self {
        Error::Canceled {
            reason: "context canceled".to_string(),
        }
    }

    /// Build a cancellation error tagging the given reason.
    pub fn canceled(reason: impl Into<String>) -> Self {
        Error::Canceled {
            reason: reason.into(),
        }
    }

    /// Build an `OptionInvalid` error.
    pub fn option_invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::OptionInvalid {
            field,
            reason: reason.into(),
        }
    }

    /// Build a `Factory` error for the given action.
    pub fn factory(action: Action, source: BoxError) -> Self {
        Error::Factory { action, source }
    }

    /// True if this error represents a cancellation (as opposed to
    /// `Closing`/`Closed`/timeout/factory failure).
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_is_canceled() {
        let err = Error::canceled("stop");
        assert!(err.is_canceled());
        assert_eq!(err.to_string(), "request canceled: stop");
    }

    #[test]
    fn canceled_generic_has_default_reason() {
        let err = Error::canceled_generic();
        assert!(err.is_canceled());
        assert!(err.to_string().contains("context canceled"));
    }

    #[test]
    fn closing_and_closed_are_not_canceled() {
        assert!(!Error::Closing.is_canceled());
        assert!(!Error::Closed.is_canceled());
        assert!(!Error::TimedOut.is_canceled());
    }

    #[test]
    fn factory_error_is_not_canceled() {
        let err = Error::factory(Action::Create, "boom".into());
        assert!(!err.is_canceled());
        assert!(err.to_string().contains("create"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn option_invalid_display() {
        let err = Error::option_invalid("max_lifetime_ms", "must not be 0");
        assert_eq!(
            err.to_string(),
            "invalid pool option max_lifetime_ms: must not be 0"
        );
    }

    #[test]
    fn action_display() {
        assert_eq!(Action::Create.to_string(), "create");
        assert_eq!(Action::Destroy.to_string(), "destroy");
        assert_eq!(Action::Reset.to_string(), "reset");
    }
}
