//! Pooled items and their lifecycle state machine.
//!
//! ```text
//! creating ──► preparing ──► ready ──► inUse
//!    │             │           │  ▲       │
//!    │             │           ▼  │       │
//!    │             │        updating ◄────┘
//!    ▼             ▼           │
//!  invalid ◄───────┴───────────┘
//!    │
//!    └──────────► deleting ──► (removed)
//! ```
//!
//! Every non-terminal state may also move straight to `deleting`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use warmpool_id::ItemId;
use warmpool_reconcile::Phase;

use crate::error::PoolError;

/// Lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    Creating,
    Preparing,
    Ready,
    InUse,
    Updating,
    Deleting,
    Invalid,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::InUse => "inUse",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Invalid => "invalid",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;

        match (self, next) {
            (Deleting, _) => false,
            (_, Deleting) => true,
            (Creating, Preparing | Invalid) => true,
            (Preparing, Ready | Invalid) => true,
            (Ready, InUse | Updating) => true,
            (InUse, Updating) => true,
            (Updating, Ready | Invalid) => true,
            _ => false,
        }
    }

    /// Whether an item in this state may be handed to the deletion worker.
    pub fn is_evictable(&self) -> bool {
        !matches!(self, Self::Deleting)
    }

    /// How the reconciliation planner sees this state.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Creating => Phase::Creating,
            Self::Preparing => Phase::Preparing,
            Self::Ready => Phase::Ready,
            Self::InUse => Phase::InUse,
            Self::Updating => Phase::Updating,
            Self::Deleting | Self::Invalid => Phase::Leaving,
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pooled resource.
///
/// `state`, `owner` and `value` can only change while the item is unlocked;
/// every successful change refreshes `last_change`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item<V> {
    id: ItemId,
    #[serde(rename = "type")]
    item_type: String,
    state: ItemState,
    owner: Option<String>,
    value: Option<V>,
    locked: bool,
    created: DateTime<Utc>,
    last_change: DateTime<Utc>,

    /// Insertion order within the owning pool.
    #[serde(skip)]
    seq: u64,
}

impl<V> Item<V> {
    /// Create an item in the `creating` state.
    pub(crate) fn new(id: ItemId, item_type: impl Into<String>, seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            item_type: item_type.into(),
            state: ItemState::Creating,
            owner: None,
            value: None,
            locked: false,
            created: now,
            last_change: now,
            seq,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// The payload. Empty until the item factory has produced one.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn last_change(&self) -> DateTime<Utc> {
        self.last_change
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Time elapsed since creation, clamped at zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created).to_std().unwrap_or_default()
    }

    /// Move to `state`. Re-setting the current state only refreshes
    /// `last_change`.
    pub fn set_state(&mut self, state: ItemState) -> Result<(), PoolError> {
        self.ensure_unlocked()?;
        if state != self.state && !self.state.can_transition_to(state) {
            return Err(PoolError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: state,
            });
        }
        self.state = state;
        self.touch();
        Ok(())
    }

    pub fn set_owner(&mut self, owner: Option<String>) -> Result<(), PoolError> {
        self.ensure_unlocked()?;
        self.owner = owner;
        self.touch();
        Ok(())
    }

    pub fn set_value(&mut self, value: V) -> Result<(), PoolError> {
        self.ensure_unlocked()?;
        self.value = Some(value);
        self.touch();
        Ok(())
    }

    /// Lock or unlock the item. Always succeeds.
    ///
    /// A locked item is skipped by reconciliation, never handed out by
    /// `use_item`, and waited on by the workers.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        self.touch();
    }

    fn ensure_unlocked(&self) -> Result<(), PoolError> {
        if self.locked {
            return Err(PoolError::Locked { id: self.id });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.last_change = Utc::now();
    }
}

impl<V> From<&Item<V>> for ItemId {
    fn from(item: &Item<V>) -> Self {
        item.id
    }
}
