//! Elastic warm resource pool.
//!
//! A [`Pool`] keeps a configurable number of pre-built items on hand so
//! consumers can claim one without waiting for it to be constructed. Three
//! background loops keep the inventory within its bounds:
//!
//! - the **reconciler** compares a snapshot against [`PoolSettings`] and
//!   queues creations and evictions
//! - the **creation worker** runs the item factory and preparation hooks
//! - the **deletion worker** runs the deletion hook and drops the item
//!
//! ```ignore
//! let pool = Pool::builder(PoolSettings::default())
//!     .item_factory(|| async { Ok::<_, anyhow::Error>(connect().await?) })
//!     .build()?;
//! pool.start()?;
//!
//! if let Some(item) = pool.use_item() {
//!     // ...
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod hooks;
pub mod item;
pub mod pool;
mod worker;

pub use config::{PoolSettings, ServiceConfig};
pub use error::PoolError;
pub use hooks::{
    IdentityPreparation, InventoryObserver, ItemDeletion, ItemFactory, ItemPreparation,
    NoopDeletion, NoopLogger, NoopObserver, PoolLogger, TracingLogger,
};
pub use item::{Item, ItemState};
pub use pool::{CreationOrigin, CreationRequest, Pool, PoolBuilder};
pub use warmpool_id::{ItemId, PoolId};
pub use warmpool_reconcile::{ConvergenceStatus, ReconcilePlan, Tally};
