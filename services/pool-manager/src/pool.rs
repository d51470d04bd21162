//! The pool façade.
//!
//! A [`Pool`] owns the inventory, the creation and deletion queues, the hooks
//! and the three background workers. All shared mutable state sits in one
//! [`PoolState`] behind a mutex that is never held across an `.await`; the
//! only suspension points are the item hooks.
//!
//! Consumer operations (`use_item`, `get_items`, `create_item`,
//! `delete_item`) are synchronous and never block on the workers. Work is
//! handed over through the queues, and the workers are woken with a
//! [`Notify`] so a request does not wait for the next tick.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warmpool_id::{ItemId, PoolId};
use warmpool_reconcile::{compute_plan, Observation, PoolBounds, ReconcilePlan};

use crate::config::PoolSettings;
use crate::error::PoolError;
use crate::hooks::{
    IdentityPreparation, InventoryObserver, ItemDeletion, ItemFactory, ItemPreparation,
    NoopDeletion, NoopLogger, NoopObserver, PoolLogger,
};
use crate::item::{Item, ItemState};
use crate::worker::{run_worker, WorkerKind};

/// Why a creation request was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CreationOrigin {
    /// Reconciliation found the pool under its lower bounds.
    Reconcile,

    /// `create_item()` was called.
    Manual,

    /// `use_item()` found nothing ready.
    Demand,
}

/// One pending creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationRequest {
    pub origin: CreationOrigin,
}

/// A construction step that found its item locked. The creation worker
/// retries it once the consumer unlocks the item.
struct ParkedStep<V> {
    id: ItemId,
    value: Option<V>,
    next: ItemState,
}

/// Outcome of applying one construction step.
enum Settled<V> {
    /// The item moved to the next state. Carries the value back.
    Applied(Option<V>),

    /// The item is locked; the step was parked.
    Parked,

    /// The item is gone or being deleted. The value is ours to dispose of.
    Dropped(Option<V>),
}

/// Inventory plus the work queues.
struct PoolState<V> {
    items: HashMap<ItemId, Item<V>>,
    next_seq: u64,
    creation_queue: VecDeque<CreationRequest>,
    deletion_queue: VecDeque<ItemId>,
    parked: VecDeque<ParkedStep<V>>,
}

impl<V> PoolState<V> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            next_seq: 0,
            creation_queue: VecDeque::new(),
            deletion_queue: VecDeque::new(),
            parked: VecDeque::new(),
        }
    }

    /// Items in insertion order.
    fn ordered(&self) -> Vec<&Item<V>> {
        let mut items: Vec<&Item<V>> = self.items.values().collect();
        items.sort_by_key(|item| item.seq());
        items
    }

    fn insert_creating(&mut self, item_type: &str) -> ItemId {
        let id = ItemId::new();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.insert(id, Item::new(id, item_type, seq));
        id
    }

    /// Queue `id` for deletion unless it is already queued.
    fn enqueue_deletion(&mut self, id: ItemId) -> bool {
        if self.deletion_queue.contains(&id) {
            return false;
        }
        self.deletion_queue.push_back(id);
        true
    }
}

struct Hooks<V> {
    factory: Arc<dyn ItemFactory<V>>,
    preparation: Arc<dyn ItemPreparation<V>>,
    deletion: Arc<dyn ItemDeletion<V>>,
    logger: Arc<dyn PoolLogger>,
    observer: Arc<dyn InventoryObserver<V>>,
}

/// Worker lifecycle. `shutdown_tx` is present while the pool is running.
#[derive(Default)]
struct WorkerSet {
    shutdown_tx: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

pub(crate) struct PoolInner<V> {
    id: PoolId,
    settings: PoolSettings,
    bounds: PoolBounds,
    hooks: Hooks<V>,
    state: Mutex<PoolState<V>>,
    creation_signal: Arc<Notify>,
    deletion_signal: Arc<Notify>,
    workers: Mutex<WorkerSet>,
}

/// An elastic pool of warm items.
///
/// Cloning is cheap; clones share the same pool.
pub struct Pool<V> {
    inner: Arc<PoolInner<V>>,
}

impl<V> Clone for Pool<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`Pool`]. Only the item factory is mandatory.
pub struct PoolBuilder<V> {
    settings: PoolSettings,
    factory: Option<Arc<dyn ItemFactory<V>>>,
    preparation: Arc<dyn ItemPreparation<V>>,
    deletion: Arc<dyn ItemDeletion<V>>,
    logger: Arc<dyn PoolLogger>,
    observer: Arc<dyn InventoryObserver<V>>,
}

impl<V> PoolBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn item_factory(mut self, factory: impl ItemFactory<V> + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn item_preparation(mut self, preparation: impl ItemPreparation<V> + 'static) -> Self {
        self.preparation = Arc::new(preparation);
        self
    }

    pub fn item_deletion(mut self, deletion: impl ItemDeletion<V> + 'static) -> Self {
        self.deletion = Arc::new(deletion);
        self
    }

    pub fn logger(mut self, logger: impl PoolLogger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Observer notified with the inventory after every reconciliation pass.
    pub fn observer(mut self, observer: impl InventoryObserver<V> + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Validate the configuration and build the pool. The pool is idle
    /// until [`Pool::start`] is called.
    pub fn build(self) -> Result<Pool<V>, PoolError> {
        let Some(factory) = self.factory else {
            return Err(PoolError::Configuration(format!(
                "{}.item_factory must be set",
                self.settings.pool_name
            )));
        };
        self.settings.validate()?;

        let id = PoolId::new();
        info!(
            pool_id = %id,
            pool = %self.settings.pool_name,
            item_type = %self.settings.item_type,
            min_items_total = self.settings.min_items_total,
            min_items_ready = self.settings.min_items_ready,
            max_items_total = self.settings.max_items_total,
            max_items_ready = self.settings.max_items_ready,
            "Pool configured"
        );

        Ok(Pool {
            inner: Arc::new(PoolInner {
                id,
                bounds: self.settings.bounds(),
                settings: self.settings,
                hooks: Hooks {
                    factory,
                    preparation: self.preparation,
                    deletion: self.deletion,
                    logger: self.logger,
                    observer: self.observer,
                },
                state: Mutex::new(PoolState::new()),
                creation_signal: Arc::new(Notify::new()),
                deletion_signal: Arc::new(Notify::new()),
                workers: Mutex::new(WorkerSet::default()),
            }),
        })
    }
}

impl<V> Pool<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start building a pool with the given settings.
    pub fn builder(settings: PoolSettings) -> PoolBuilder<V> {
        PoolBuilder {
            settings,
            factory: None,
            preparation: Arc::new(IdentityPreparation),
            deletion: Arc::new(NoopDeletion),
            logger: Arc::new(NoopLogger),
            observer: Arc::new(NoopObserver),
        }
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner<V>>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the reconciler and both workers. Calling it on a running pool
    /// does nothing.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut workers = self.lock_workers();
        if workers.shutdown_tx.is_some() {
            debug!(pool = %self.inner.settings.pool_name, "Pool already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = &self.inner.settings;

        workers.handles.retain(|handle| !handle.is_finished());
        for (kind, period, wake) in [
            (WorkerKind::Reconciler, settings.refresh_period, None),
            (
                WorkerKind::Creation,
                settings.creation_wait_period,
                Some(Arc::clone(&self.inner.creation_signal)),
            ),
            (
                WorkerKind::Deletion,
                settings.deletion_wait_period,
                Some(Arc::clone(&self.inner.deletion_signal)),
            ),
        ] {
            workers.handles.push(runtime.spawn(run_worker(
                kind,
                Arc::downgrade(&self.inner),
                period,
                wake,
                shutdown_rx.clone(),
            )));
        }
        workers.shutdown_tx = Some(shutdown_tx);
        drop(workers);

        info!(pool = %settings.pool_name, pool_id = %self.inner.id, "Pool started");
        self.log(format!("Starting {}", settings.pool_name));
        Ok(())
    }

    /// Stop scheduling work. Hook calls already in flight run to completion;
    /// use [`Pool::shutdown`] to wait for them.
    pub fn stop(&self) {
        let Some(shutdown_tx) = self.lock_workers().shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(true);

        info!(pool = %self.inner.settings.pool_name, "Pool stopped");
        self.log(format!("Stopping {}", self.inner.settings.pool_name));
    }

    /// Stop the pool and wait until every worker has finished its current
    /// unit of work.
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut self.lock_workers().handles);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Pool worker task panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_workers().shutdown_tx.is_some()
    }

    // -------------------------------------------------------------------------
    // Consumer operations
    // -------------------------------------------------------------------------

    /// Claim the first ready item in insertion order.
    ///
    /// Returns `None` when nothing is ready and queues one creation so a
    /// later call can succeed.
    pub fn use_item(&self) -> Option<Item<V>> {
        self.claim(None)
    }

    /// Like [`Pool::use_item`], also recording `owner` on the item.
    pub fn use_item_for(&self, owner: impl Into<String>) -> Option<Item<V>> {
        self.claim(Some(owner.into()))
    }

    fn claim(&self, owner: Option<String>) -> Option<Item<V>> {
        let claimed = {
            let mut state = self.lock_state();
            let pending: HashSet<ItemId> = state.deletion_queue.iter().copied().collect();
            let candidate = state
                .ordered()
                .into_iter()
                .find(|item| {
                    item.state() == ItemState::Ready
                        && !item.is_locked()
                        && !pending.contains(&item.id())
                })
                .map(|item| item.id());

            let found = match candidate {
                Some(id) => state.items.get_mut(&id),
                None => None,
            };
            let Some(item) = found else {
                state.creation_queue.push_back(CreationRequest {
                    origin: CreationOrigin::Demand,
                });
                drop(state);
                return self.creation_requested();
            };

            let outcome = item.set_state(ItemState::InUse).and_then(|()| match owner {
                Some(owner) => item.set_owner(Some(owner)),
                None => Ok(()),
            });
            match outcome {
                Ok(()) => Some(item.clone()),
                Err(e) => {
                    warn!(item_id = %item.id(), error = %e, "Failed to claim ready item");
                    None
                }
            }
        };

        if let Some(item) = &claimed {
            debug!(item_id = %item.id(), "Item claimed");
        }
        claimed
    }

    fn creation_requested(&self) -> Option<Item<V>> {
        debug!(pool = %self.inner.settings.pool_name, "No ready item, creation queued");
        self.inner.creation_signal.notify_one();
        None
    }

    /// Snapshot of every item, in insertion order.
    pub fn get_items(&self) -> Vec<Item<V>> {
        self.lock_state().ordered().into_iter().cloned().collect()
    }

    /// Snapshot of one item.
    pub fn get_item(&self, id: &ItemId) -> Option<Item<V>> {
        self.lock_state().items.get(id).cloned()
    }

    /// Queue one creation.
    pub fn create_item(&self) {
        self.lock_state().creation_queue.push_back(CreationRequest {
            origin: CreationOrigin::Manual,
        });
        self.inner.creation_signal.notify_one();
    }

    /// Queue an item for deletion. Unknown ids are ignored.
    pub fn delete_item(&self, id: impl Into<ItemId>) {
        let id = id.into();
        let queued = {
            let mut state = self.lock_state();
            state.items.contains_key(&id) && state.enqueue_deletion(id)
        };
        if queued {
            self.inner.deletion_signal.notify_one();
        } else {
            debug!(item_id = %id, "Deletion ignored, item unknown or already queued");
        }
    }

    /// Run `f` against an item under the pool lock.
    ///
    /// This is how consumers lock, revalidate and unlock items:
    ///
    /// ```ignore
    /// pool.modify_item(&id, |item| item.set_state(ItemState::Updating));
    /// ```
    pub fn modify_item<R>(&self, id: &ItemId, f: impl FnOnce(&mut Item<V>) -> R) -> Option<R> {
        self.lock_state().items.get_mut(id).map(f)
    }

    /// Creation requests not yet picked up by the creation worker.
    pub fn pending_creations(&self) -> usize {
        self.lock_state().creation_queue.len()
    }

    /// Item ids waiting for the deletion worker.
    pub fn pending_deletions(&self) -> Vec<ItemId> {
        self.lock_state().deletion_queue.iter().copied().collect()
    }

    /// Items whose next construction step waits for a consumer to unlock
    /// them.
    pub fn awaiting_unlock(&self) -> Vec<ItemId> {
        self.lock_state().parked.iter().map(|step| step.id).collect()
    }

    // -------------------------------------------------------------------------
    // Single steps of the background loops
    // -------------------------------------------------------------------------

    /// Run one reconciliation pass: plan against a snapshot, queue the work,
    /// then notify the observer.
    pub fn reconcile_once(&self) -> ReconcilePlan<ItemId> {
        let now = Utc::now();
        let (plan, snapshot) = {
            let mut state = self.lock_state();
            let observations: Vec<Observation<ItemId>> = state
                .ordered()
                .into_iter()
                .map(|item| Observation {
                    key: item.id(),
                    phase: item.state().phase(),
                    locked: item.is_locked(),
                    age: item.age(now),
                })
                .collect();

            let queued = state.creation_queue.len();
            let plan = compute_plan(&self.inner.bounds, &observations, queued);

            for _ in 0..plan.create {
                state.creation_queue.push_back(CreationRequest {
                    origin: CreationOrigin::Reconcile,
                });
            }
            for id in plan.evictions() {
                state.enqueue_deletion(*id);
            }

            (plan, state.items.clone())
        };

        if plan.create > 0 {
            self.inner.creation_signal.notify_one();
        }
        if plan.evictions().next().is_some() {
            self.inner.deletion_signal.notify_one();
        }

        if plan.status().is_converged() {
            debug!(
                pool = %self.inner.settings.pool_name,
                total = plan.tally.total,
                ready = plan.tally.ready,
                "Pool converged"
            );
        } else {
            info!(
                pool = %self.inner.settings.pool_name,
                total = plan.tally.total,
                ready = plan.tally.ready,
                almost_ready = plan.tally.almost_ready(),
                create = plan.create,
                evict_overflow = plan.evict_overflow.len(),
                evict_expired = plan.evict_expired.len(),
                "Reconciling pool"
            );
        }

        self.inner.hooks.observer.items_changed(&snapshot);
        plan
    }

    /// Serve one unit of creation work: a parked step whose item is no
    /// longer locked, or else the next queued request. Returns false when
    /// there was nothing to do right now.
    ///
    /// Never waits on a locked item, so one locked item cannot hold up the
    /// rest of the queue or a shutdown.
    pub async fn create_next(&self) -> bool {
        if let Some(step) = self.take_resumable() {
            debug!(item_id = %step.id, next = %step.next, "Resuming parked step");
            self.proceed(step.id, step.value, step.next).await;
            return true;
        }

        let item_type = self.inner.settings.item_type.as_str();
        let (id, origin) = {
            let mut state = self.lock_state();
            let Some(request) = state.creation_queue.pop_front() else {
                return false;
            };
            (state.insert_creating(item_type), request.origin)
        };

        info!(item_id = %id, item_type, ?origin, "Creating item");
        self.log(format!("Creating {item_type} item with id={id}"));
        match self.inner.hooks.factory.create().await {
            Ok(raw) => {
                self.log(format!("Done Creating {item_type} item with id={id}"));
                self.proceed(id, Some(raw), ItemState::Preparing).await;
            }
            Err(source) => {
                self.report_failure(PoolError::Factory { id, source }, "Creating", id);
                self.proceed(id, None, ItemState::Invalid).await;
            }
        }
        true
    }

    /// Serve one deletion request. Returns false when there was nothing to
    /// do right now (empty queue, or the head item is locked).
    pub async fn delete_next(&self) -> bool {
        let (id, item_type, value) = {
            let mut state = self.lock_state();
            let Some(id) = state.deletion_queue.pop_front() else {
                return false;
            };
            let PoolState {
                items,
                deletion_queue,
                ..
            } = &mut *state;

            match items.get_mut(&id) {
                None => {
                    debug!(item_id = %id, "Item already removed");
                    return true;
                }
                Some(item) if !item.state().is_evictable() => {
                    debug!(item_id = %id, "Item already being deleted");
                    return true;
                }
                Some(item) if item.is_locked() => {
                    debug!(item_id = %id, "Item locked, deletion postponed");
                    deletion_queue.push_back(id);
                    return false;
                }
                Some(item) => {
                    // The creation worker still holds the value of an item
                    // under construction and disposes of it when its hook
                    // returns.
                    let constructing =
                        matches!(item.state(), ItemState::Creating | ItemState::Preparing);
                    if let Err(e) = item.set_state(ItemState::Deleting) {
                        warn!(item_id = %id, error = %e, "Unexpected state for deletion");
                    }
                    let value = if constructing {
                        None
                    } else {
                        item.value().cloned()
                    };
                    (id, item.item_type().to_string(), value)
                }
            }
        };

        self.log(format!("Deleting {item_type} item with id={id}"));
        if let Some(value) = value {
            if let Err(source) = self.inner.hooks.deletion.delete(value).await {
                let err = PoolError::Deletion { id, source };
                error!(item_id = %id, error = %err, "Item deletion hook failed");
                self.log(format!("Failed Deleting {item_type} item with id={id}: {err}"));
            }
        }

        self.lock_state().items.remove(&id);
        self.log(format!("Done Deleting {item_type} item with id={id}"));
        info!(item_id = %id, item_type = %item_type, "Item deleted");
        true
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Drive an item through the rest of its construction, starting with
    /// the move to `next`. Stops when the item is ready, invalid, locked
    /// (the step is parked) or gone (the value is disposed of).
    async fn proceed(&self, id: ItemId, mut value: Option<V>, mut next: ItemState) {
        let item_type = self.inner.settings.item_type.as_str();
        loop {
            let applied = match self.settle(id, value, next) {
                Settled::Applied(applied) => applied,
                Settled::Parked => return,
                Settled::Dropped(orphan) => {
                    if let Some(orphan) = orphan {
                        self.dispose_orphan(id, orphan).await;
                    }
                    return;
                }
            };

            match (next, applied) {
                (ItemState::Preparing, Some(raw)) => {
                    self.log(format!("Preparing {item_type} item with id={id}"));
                    match self.inner.hooks.preparation.prepare(raw).await {
                        Ok(prepared) => {
                            self.log(format!("Done Preparing {item_type} item with id={id}"));
                            value = Some(prepared);
                            next = ItemState::Ready;
                        }
                        Err(source) => {
                            let err = PoolError::Preparation { id, source };
                            self.report_failure(err, "Preparing", id);
                            value = None;
                            next = ItemState::Invalid;
                        }
                    }
                }
                (ItemState::Ready, _) => {
                    info!(item_id = %id, item_type, "Item ready");
                    return;
                }
                (ItemState::Invalid, _) => {
                    self.lock_state().enqueue_deletion(id);
                    self.inner.deletion_signal.notify_one();
                    return;
                }
                _ => return,
            }
        }
    }

    /// Apply one construction step under the state lock: store `value` (if
    /// any) and move the item to `next`.
    fn settle(&self, id: ItemId, value: Option<V>, next: ItemState) -> Settled<V> {
        let mut state = self.lock_state();
        let PoolState { items, parked, .. } = &mut *state;

        let Some(item) = items.get_mut(&id) else {
            debug!(item_id = %id, "Item removed during creation");
            return Settled::Dropped(value);
        };
        if item.is_locked() {
            debug!(item_id = %id, next = %next, "Item locked, step parked");
            parked.push_back(ParkedStep { id, value, next });
            return Settled::Parked;
        }
        if item.state() == ItemState::Deleting {
            debug!(item_id = %id, "Item deleted during creation");
            return Settled::Dropped(value);
        }
        if item.state() != next && !item.state().can_transition_to(next) {
            warn!(
                item_id = %id,
                from = %item.state(),
                to = %next,
                "Item changed state during creation"
            );
            return Settled::Dropped(value);
        }

        let stored = match &value {
            Some(v) => item.set_value(v.clone()),
            None => Ok(()),
        }
        .and_then(|()| item.set_state(next));
        match stored {
            Ok(()) => Settled::Applied(value),
            Err(e) => {
                warn!(item_id = %id, error = %e, "Failed to apply construction step");
                Settled::Dropped(value)
            }
        }
    }

    /// First parked step whose item is unlocked or gone.
    fn take_resumable(&self) -> Option<ParkedStep<V>> {
        let mut state = self.lock_state();
        let PoolState { items, parked, .. } = &mut *state;
        let position = parked
            .iter()
            .position(|step| items.get(&step.id).map_or(true, |item| !item.is_locked()))?;
        parked.remove(position)
    }

    /// Log a hook failure. Recovery (invalid, then deletion) follows.
    fn report_failure(&self, err: PoolError, step: &str, id: ItemId) {
        let item_type = &self.inner.settings.item_type;
        error!(item_id = %id, error = %err, "Item creation failed");
        self.log(format!("Failed {step} {item_type} item with id={id}: {err}"));
    }

    /// Dispose of a value whose item vanished while a hook was running.
    async fn dispose_orphan(&self, id: ItemId, value: V) {
        debug!(item_id = %id, "Item removed during creation, disposing value");
        if let Err(source) = self.inner.hooks.deletion.delete(value).await {
            let err = PoolError::Deletion { id, source };
            warn!(item_id = %id, error = %err, "Failed to dispose orphaned value");
        }
    }

    pub(crate) fn log(&self, line: impl AsRef<str>) {
        self.inner.hooks.logger.log(line.as_ref());
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<V>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_workers(&self) -> MutexGuard<'_, WorkerSet> {
        self.inner.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
