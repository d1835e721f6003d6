//! Pool options: mutable configuration, validated on every change, with
//! a diff so the pool core knows which reactions to run.
//!
//! Mirrors the validate-then-apply shape of `PoolConfig::validate` in
//! the resource crate this is descended from, generalised to this pool's
//! negative-means-unlimited numeric caps.

use crate::error::{Error, Result};

/// Live pool configuration.
///
/// All four caps use the convention that a negative value means
/// "unlimited". `max_lifetime_ms`, `max_idle_time_ms`, and
/// `max_open_count` additionally disallow exactly `0`; `max_idle_count`
/// allows `0` (meaning "never keep anything idle").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Destroy an element when its age since creation exceeds this many
    /// milliseconds. Negative means unlimited; `0` is disallowed.
    pub max_lifetime_ms: i64,
    /// Destroy a pooled element when its idle time exceeds this many
    /// milliseconds. Negative means unlimited; `0` is disallowed.
    pub max_idle_time_ms: i64,
    /// Ceiling on `active + idle`. Negative means unlimited; `0` is
    /// disallowed.
    pub max_open_count: i64,
    /// Ceiling on `idle`. Negative means unlimited; `0` is allowed.
    pub max_idle_count: i64,
    /// If `false`, `grow` awaits each `create()` one at a time instead of
    /// firing them concurrently.
    pub parallel_create: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_lifetime_ms: -1,
            max_idle_time_ms: -1,
            max_open_count: -1,
            max_idle_count: -1,
            parallel_create: true,
        }
    }
}

impl PoolOptions {
    /// Validate the current values, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.max_lifetime_ms == 0 {
            return Err(Error::option_invalid("max_lifetime_ms", "must not be 0"));
        }
        if self.max_idle_time_ms == 0 {
            return Err(Error::option_invalid("max_idle_time_ms", "must not be 0"));
        }
        if self.max_open_count == 0 {
            return Err(Error::option_invalid("max_open_count", "must not be 0"));
        }
        Ok(())
    }

    /// `true` if `max_open_count` is negative (unlimited).
    #[must_use]
    pub fn open_count_unlimited(&self) -> bool {
        self.max_open_count < 0
    }

    /// `true` if `max_idle_count` is negative (unlimited).
    #[must_use]
    pub fn idle_count_unlimited(&self) -> bool {
        self.max_idle_count < 0
    }

    /// `true` if `max_lifetime_ms` is a finite positive bound.
    #[must_use]
    pub fn lifetime_bounded(&self) -> bool {
        self.max_lifetime_ms > 0
    }

    /// `true` if `max_idle_time_ms` is a finite positive bound.
    #[must_use]
    pub fn idle_time_bounded(&self) -> bool {
        self.max_idle_time_ms > 0
    }

    /// Apply a partial update, validating the resulting whole before
    /// committing. On success, returns which fields actually changed so
    /// the pool core can run the matching reaction (reschedule sweep,
    /// trigger grow, shrink idle, …).
    pub fn apply(&mut self, patch: OptionsPatch) -> Result<OptionsDiff> {
        let mut next = self.clone();
        if let Some(v) = patch.max_lifetime_ms {
            next.max_lifetime_ms = v;
        }
        if let Some(v) = patch.max_idle_time_ms {
            next.max_idle_time_ms = v;
        }
        if let Some(v) = patch.max_open_count {
            next.max_open_count = v;
        }
        if let Some(v) = patch.max_idle_count {
            next.max_idle_count = v;
        }
        if let Some(v) = patch.parallel_create {
            next.parallel_create = v;
        }
        next.validate()?;

        let diff = OptionsDiff {
            lifetime_changed: next.max_lifetime_ms != self.max_lifetime_ms,
            idle_time_changed: next.max_idle_time_ms != self.max_idle_time_ms,
            open_count_changed: next.max_open_count != self.max_open_count,
            idle_count_changed: next.max_idle_count != self.max_idle_count,
        };
        *self = next;
        Ok(diff)
    }
}

/// A partial update to [`PoolOptions`]; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct OptionsPatch {
    /// New `max_lifetime_ms`, if changing.
    pub max_lifetime_ms: Option<i64>,
    /// New `max_idle_time_ms`, if changing.
    pub max_idle_time_ms: Option<i64>,
    /// New `max_open_count`, if changing.
    pub max_open_count: Option<i64>,
    /// New `max_idle_count`, if changing.
    pub max_idle_count: Option<i64>,
    /// New `parallel_create`, if changing.
    pub parallel_create: Option<bool>,
}

/// Which fields an [`PoolOptions::apply`] call actually changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsDiff {
    /// `max_lifetime_ms` changed.
    pub lifetime_changed: bool,
    /// `max_idle_time_ms` changed.
    pub idle_time_changed: bool,
    /// `max_open_count` changed.
    pub open_count_changed: bool,
    /// `max_idle_count` changed.
    pub idle_count_changed: bool,
}

impl OptionsDiff {
    /// `true` if either lifetime-affecting field changed — the sweep
    /// reaction cares about either.
    #[must_use]
    pub fn sweep_affecting(&self) -> bool {
        self.lifetime_changed || self.idle_time_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unlimited_and_parallel() {
        let opts = PoolOptions::default();
        assert!(opts.open_count_unlimited());
        assert!(opts.idle_count_unlimited());
        assert!(!opts.lifetime_bounded());
        assert!(!opts.idle_time_bounded());
        assert!(opts.parallel_create);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn zero_is_disallowed_for_three_fields() {
        let mut opts = PoolOptions::default();
        assert!(opts.validate().is_ok());

        let mut bad = opts.clone();
        bad.max_lifetime_ms = 0;
        assert!(bad.validate().is_err());

        let mut bad = opts.clone();
        bad.max_idle_time_ms = 0;
        assert!(bad.validate().is_err());

        bad = opts.clone();
        bad.max_open_count = 0;
        assert!(bad.validate().is_err());

        opts.max_idle_count = 0;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn apply_rejects_disallowed_value_without_mutating() {
        let mut opts = PoolOptions::default();
        let before = opts.clone();
        let result = opts.apply(OptionsPatch {
            max_open_count: Some(0),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(opts, before);
    }

    #[test]
    fn apply_reports_only_changed_fields() {
        let mut opts = PoolOptions::default();
        let diff = opts
            .apply(OptionsPatch {
                max_open_count: Some(4),
                ..Default::default()
            })
            .unwrap();
        assert!(diff.open_count_changed);
        assert!(!diff.idle_count_changed);
        assert!(!diff.sweep_affecting());
        assert_eq!(opts.max_open_count, 4);
    }

    #[test]
    fn apply_detects_sweep_affecting_changes() {
        let mut opts = PoolOptions::default();
        let diff = opts
            .apply(OptionsPatch {
                max_lifetime_ms: Some(10_000),
                ..Default::default()
            })
            .unwrap();
        assert!(diff.sweep_affecting());
        assert!(diff.lifetime_changed);
        assert!(!diff.idle_time_changed);
    }

    #[test]
    fn apply_no_op_patch_changes_nothing() {
        let mut opts = PoolOptions::default();
        let diff = opts.apply(OptionsPatch::default()).unwrap();
        assert!(!diff.lifetime_changed);
        assert!(!diff.idle_time_changed);
        assert!(!diff.open_count_changed);
        assert!(!diff.idle_count_changed);
    }
}
