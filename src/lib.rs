#![allow(clippy::excessive_nesting)]

//! # respool
//!
//! A generic asynchronous resource pool: a FIFO wait queue, a LIFO idle
//! stack, bounded open/idle counts, lifecycle sweeps, and graceful
//! shutdown, built around a caller-supplied [`Factory`].
//!
//! ```no_run
//! use respool::{Factory, Pool, Result};
//!
//! struct Connections;
//!
//! impl Factory for Connections {
//!     type Item = u32;
//!
//!     async fn create(&self) -> Result<u32> {
//!         Ok(1)
//!     }
//!
//!     async fn destroy(&self, _item: u32) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let pool = Pool::new(Connections);
//! let item = pool.get(None).await?;
//! drop(item);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod error;
pub mod events;
pub mod factory;
pub mod guard;
pub mod options;
pub mod pool;
pub mod promise;
pub mod wait;

pub use cancel::{CancelToken, SubscriptionId};
pub use error::{Action, BoxError, Error, Result};
pub use events::{ErrorBus, ErrorEvent};
pub use factory::Factory;
pub use guard::Guard;
pub use options::{OptionsDiff, OptionsPatch, PoolOptions};
pub use pool::{Pool, Pooled, Stats};
pub use promise::{promise, promise_with_cancel, Promise, Resolver};
pub use wait::{limit, wait, Bound};
