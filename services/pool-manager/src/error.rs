//! Error types for pool operations.

use thiserror::Error;
use warmpool_id::ItemId;

use crate::item::ItemState;

/// Errors raised by the pool and its items.
///
/// Hook failures (`Factory`, `Preparation`, `Deletion`) never escape the
/// workers; they are built so the failure can be logged with its item before
/// recovery runs.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool configuration is unusable. Raised before `start()`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A mutator was called while the item is locked.
    #[error("item {id} is locked")]
    Locked { id: ItemId },

    /// The requested state change is not a legal lifecycle transition.
    #[error("item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ItemId,
        from: ItemState,
        to: ItemState,
    },

    /// The item factory failed.
    #[error("item factory failed for {id}: {source:#}")]
    Factory {
        id: ItemId,
        #[source]
        source: anyhow::Error,
    },

    /// The preparation hook failed.
    #[error("item preparation failed for {id}: {source:#}")]
    Preparation {
        id: ItemId,
        #[source]
        source: anyhow::Error,
    },

    /// The deletion hook failed.
    #[error("item deletion failed for {id}: {source:#}")]
    Deletion {
        id: ItemId,
        #[source]
        source: anyhow::Error,
    },

    /// `start()` was called outside a tokio runtime.
    #[error("pool workers need a running tokio runtime")]
    NoRuntime,
}

impl PoolError {
    /// Returns true for the hook failures the workers recover from.
    pub fn is_hook_failure(&self) -> bool {
        matches!(
            self,
            Self::Factory { .. } | Self::Preparation { .. } | Self::Deletion { .. }
        )
    }
}
