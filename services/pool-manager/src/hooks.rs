//! Pluggable item hooks.
//!
//! The pool never knows what its items are. It calls out to:
//! - an [`ItemFactory`] to produce a raw value (required)
//! - an [`ItemPreparation`] to refine it (default: identity)
//! - an [`ItemDeletion`] to dispose of it (default: no-op)
//! - a [`PoolLogger`] for human-readable progress lines (default: no-op)
//! - an [`InventoryObserver`] notified after every reconciliation pass
//!
//! The async hooks are the only places the workers suspend. Closures of the
//! right shape implement every hook, so tests and small binaries can pass
//! `|| async { ... }` directly.

use std::collections::HashMap;
use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use warmpool_id::ItemId;

use crate::item::Item;

/// Produces the raw value for a new item.
#[async_trait]
pub trait ItemFactory<V>: Send + Sync {
    async fn create(&self) -> Result<V>;
}

/// Refines a raw value into the value a ready item carries.
#[async_trait]
pub trait ItemPreparation<V>: Send + Sync {
    async fn prepare(&self, value: V) -> Result<V>;
}

/// Disposes of an item's value before the item leaves the inventory.
#[async_trait]
pub trait ItemDeletion<V>: Send + Sync {
    async fn delete(&self, value: V) -> Result<()>;
}

/// Receives one human-readable line per lifecycle step.
pub trait PoolLogger: Send + Sync {
    fn log(&self, line: &str);
}

/// Read-only notification of the full inventory.
pub trait InventoryObserver<V>: Send + Sync {
    fn items_changed(&self, items: &HashMap<ItemId, Item<V>>);
}

#[async_trait]
impl<V, F, Fut> ItemFactory<V> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<V>> + Send + 'static,
    V: Send + 'static,
{
    async fn create(&self) -> Result<V> {
        (self)().await
    }
}

#[async_trait]
impl<V, F, Fut> ItemPreparation<V> for F
where
    F: Fn(V) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V>> + Send + 'static,
    V: Send + 'static,
{
    async fn prepare(&self, value: V) -> Result<V> {
        (self)(value).await
    }
}

#[async_trait]
impl<V, F, Fut> ItemDeletion<V> for F
where
    F: Fn(V) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
    V: Send + 'static,
{
    async fn delete(&self, value: V) -> Result<()> {
        (self)(value).await
    }
}

impl<F> PoolLogger for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        (self)(line)
    }
}

impl<V, F> InventoryObserver<V> for F
where
    F: Fn(&HashMap<ItemId, Item<V>>) + Send + Sync,
{
    fn items_changed(&self, items: &HashMap<ItemId, Item<V>>) {
        (self)(items)
    }
}

/// Hands the raw value through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPreparation;

#[async_trait]
impl<V: Send + 'static> ItemPreparation<V> for IdentityPreparation {
    async fn prepare(&self, value: V) -> Result<V> {
        Ok(value)
    }
}

/// Drops the value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeletion;

#[async_trait]
impl<V: Send + 'static> ItemDeletion<V> for NoopDeletion {
    async fn delete(&self, _value: V) -> Result<()> {
        Ok(())
    }
}

/// Discards every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl PoolLogger for NoopLogger {
    fn log(&self, _line: &str) {}
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl PoolLogger for TracingLogger {
    fn log(&self, line: &str) {
        info!(target: "warmpool::progress", "{line}");
    }
}

/// Ignores inventory notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<V> InventoryObserver<V> for NoopObserver {
    fn items_changed(&self, _items: &HashMap<ItemId, Item<V>>) {}
}
