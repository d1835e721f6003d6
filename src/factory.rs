//! The `Factory` trait: how the pool creates, destroys, and resets items.
//!
//! Narrowed from the `Resource` trait this is descended from down to the
//! three operations this pool actually drives; `is_valid`/`dependencies`
//! have no counterpart here — the pool's own lifecycle caps and sweep
//! are the only validity mechanism.

use std::future::Future;

use crate::error::Result;

/// Supplies and reclaims the items a [`crate::pool::Pool`] manages.
///
/// Implementations are owned exclusively by the pool — callers must
/// never invoke these methods themselves.
pub trait Factory: Send + Sync + 'static {
    /// The item type this factory produces.
    type Item: Send + Sync + 'static;

    /// Produce a fresh item.
    fn create(&self) -> impl Future<Output = Result<Self::Item>> + Send;

    /// Release the underlying resources held by `item`. May fail, but
    /// the item is considered destroyed regardless — the pool does not
    /// retry and does not re-pool it.
    fn destroy(&self, item: Self::Item) -> impl Future<Output = Result<()>> + Send;

    /// Synchronously inspect/refurbish `item` before it returns to the
    /// idle pool. An `Err` causes the item to be destroyed instead of
    /// pooled. The default accepts every item unconditionally.
    fn reset(&self, _item: &mut Self::Item) -> Result<()> {
        Ok(())
    }
}
