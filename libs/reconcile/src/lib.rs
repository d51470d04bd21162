//! Reconciliation planning for elastic warm pools.
//!
//! A pool keeps its inventory between configured bounds by running a
//! periodic reconciliation pass. This crate holds the pure part of that
//! pass: given a snapshot of the inventory, compute what must be created and
//! what must be evicted. Applying the plan (pushing onto queues) is the
//! caller's job.
//!
//! - **Observation**: one inventory entry as seen in the snapshot.
//! - **Bounds**: minimum/maximum totals, minimum/maximum ready, maximum age.
//! - **Plan**: creations to enqueue plus keys to evict.
//!
//! # Invariants
//!
//! - Planning is deterministic given the same inputs
//! - Locked entries are never counted or evicted
//! - Only ready entries are ever chosen for eviction
//! - Overflow eviction picks entries in snapshot (insertion) order

use std::time::Duration;

use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A lower bound exceeds its upper bound, so the pool would oscillate.
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
}

/// Lifecycle phase of an observed entry, as far as planning is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Being constructed by the item factory.
    Creating,

    /// Being refined by the preparation hook.
    Preparing,

    /// Constructed, prepared and available.
    Ready,

    /// Claimed by a consumer.
    InUse,

    /// Under revalidation. Not counted as almost ready.
    Updating,

    /// Being deleted or marked invalid; already on its way out.
    Leaving,
}

/// One inventory entry in a reconciliation snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<K> {
    /// Key used to enqueue the entry for eviction.
    pub key: K,

    /// Current lifecycle phase.
    pub phase: Phase,

    /// Whether a consumer holds the entry's lock.
    pub locked: bool,

    /// Time since the entry was created.
    pub age: Duration,
}

/// Inventory bounds the planner converges to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolBounds {
    pub min_items_total: usize,
    pub min_items_ready: usize,
    pub max_items_total: usize,
    pub max_items_ready: usize,

    /// Ready entries older than this are evicted regardless of counts.
    pub max_item_age: Duration,
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self {
            min_items_total: 1,
            min_items_ready: 1,
            max_items_total: 10,
            max_items_ready: 10,
            max_item_age: DEFAULT_MAX_ITEM_AGE,
        }
    }
}

impl PoolBounds {
    /// Check that every lower bound fits under its upper bound.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.min_items_total > self.max_items_total {
            return Err(ReconcileError::InvalidBounds(format!(
                "min_items_total ({}) exceeds max_items_total ({})",
                self.min_items_total, self.max_items_total
            )));
        }
        if self.min_items_ready > self.max_items_ready {
            return Err(ReconcileError::InvalidBounds(format!(
                "min_items_ready ({}) exceeds max_items_ready ({})",
                self.min_items_ready, self.max_items_ready
            )));
        }
        Ok(())
    }
}

/// Counts over the non-locked, non-leaving part of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: usize,
    pub ready: usize,
    pub creating: usize,
    pub preparing: usize,
    pub updating: usize,
    pub in_use: usize,
}

impl Tally {
    /// Entries that are ready or on their way to ready.
    ///
    /// Updating entries are deliberately left out.
    pub fn almost_ready(&self) -> usize {
        self.ready + self.creating + self.preparing
    }
}

/// Convergence status of a pool after planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Inventory is within bounds; nothing to do.
    Converged,

    /// Work was planned; inventory is moving toward its bounds.
    Converging,
}

impl ConvergenceStatus {
    /// Returns true if the pool has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Output of one reconciliation computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan<K> {
    /// Counts the plan was computed from.
    pub tally: Tally,

    /// Creation requests to enqueue, net of those already queued.
    pub create: usize,

    /// Ready entries evicted to bring counts under the upper bounds.
    pub evict_overflow: Vec<K>,

    /// Ready entries evicted for exceeding the maximum age.
    pub evict_expired: Vec<K>,
}

impl<K> ReconcilePlan<K> {
    /// Whether this plan asks for any work.
    pub fn status(&self) -> ConvergenceStatus {
        if self.create == 0 && self.evict_overflow.is_empty() && self.evict_expired.is_empty() {
            ConvergenceStatus::Converged
        } else {
            ConvergenceStatus::Converging
        }
    }

    /// All keys to evict, overflow first.
    pub fn evictions(&self) -> impl Iterator<Item = &K> {
        self.evict_overflow.iter().chain(self.evict_expired.iter())
    }
}

/// Compute a reconciliation plan from a snapshot.
///
/// `observations` must be in insertion order; overflow eviction takes the
/// first ready entries in that order. `queued_creations` is the number of
/// creation requests already waiting, which are subtracted from the demand.
pub fn compute_plan<K: Clone + PartialEq>(
    bounds: &PoolBounds,
    observations: &[Observation<K>],
    queued_creations: usize,
) -> ReconcilePlan<K> {
    let live: Vec<&Observation<K>> = observations
        .iter()
        .filter(|o| !o.locked && o.phase != Phase::Leaving)
        .collect();

    let mut tally = Tally {
        total: live.len(),
        ..Tally::default()
    };
    for o in &live {
        match o.phase {
            Phase::Ready => tally.ready += 1,
            Phase::Creating => tally.creating += 1,
            Phase::Preparing => tally.preparing += 1,
            Phase::Updating => tally.updating += 1,
            Phase::InUse => tally.in_use += 1,
            Phase::Leaving => {}
        }
    }

    let want_create = bounds
        .min_items_total
        .saturating_sub(tally.total)
        .max(bounds.min_items_ready.saturating_sub(tally.almost_ready()));
    let create = want_create.saturating_sub(queued_creations);

    let want_delete = tally
        .total
        .saturating_sub(bounds.max_items_total)
        .max(tally.ready.saturating_sub(bounds.max_items_ready));

    let ready: Vec<&Observation<K>> = live
        .iter()
        .copied()
        .filter(|o| o.phase == Phase::Ready)
        .collect();

    let evict_overflow: Vec<K> = ready
        .iter()
        .take(want_delete)
        .map(|o| o.key.clone())
        .collect();

    let evict_expired: Vec<K> = ready
        .iter()
        .filter(|o| o.age > bounds.max_item_age)
        .map(|o| o.key.clone())
        .filter(|k| !evict_overflow.contains(k))
        .collect();

    ReconcilePlan {
        tally,
        create,
        evict_overflow,
        evict_expired,
    }
}

/// Default interval between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum age of a ready item.
pub const DEFAULT_MAX_ITEM_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60); // 30 days

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn obs(key: u32, phase: Phase) -> Observation<u32> {
        Observation {
            key,
            phase,
            locked: false,
            age: Duration::ZERO,
        }
    }

    fn bounds(min_total: usize, min_ready: usize, max_total: usize, max_ready: usize) -> PoolBounds {
        PoolBounds {
            min_items_total: min_total,
            min_items_ready: min_ready,
            max_items_total: max_total,
            max_items_ready: max_ready,
            max_item_age: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_empty_pool_creates_minimum() {
        let plan = compute_plan::<u32>(&bounds(3, 1, 10, 10), &[], 0);
        assert_eq!(plan.create, 3);
        assert!(plan.evict_overflow.is_empty());
        assert_eq!(plan.status(), ConvergenceStatus::Converging);
    }

    #[test]
    fn test_queued_creations_are_subtracted() {
        let plan = compute_plan::<u32>(&bounds(3, 1, 10, 10), &[], 2);
        assert_eq!(plan.create, 1);

        let plan = compute_plan::<u32>(&bounds(3, 1, 10, 10), &[], 5);
        assert_eq!(plan.create, 0);
    }

    #[test]
    fn test_converged_pool() {
        let items = vec![obs(1, Phase::Ready)];
        let plan = compute_plan(&bounds(1, 1, 10, 10), &items, 0);
        assert!(plan.status().is_converged());
    }

    #[rstest]
    #[case::ready(Phase::Ready, 0)]
    #[case::creating(Phase::Creating, 0)]
    #[case::preparing(Phase::Preparing, 0)]
    #[case::updating_is_not_almost_ready(Phase::Updating, 1)]
    #[case::in_use(Phase::InUse, 1)]
    fn test_almost_ready_rule(#[case] phase: Phase, #[case] expected_create: usize) {
        let items = vec![obs(1, phase)];
        let plan = compute_plan(&bounds(1, 1, 10, 10), &items, 0);
        assert_eq!(plan.create, expected_create);
    }

    #[test]
    fn test_updating_item_triggers_replacement() {
        let items = vec![
            obs(1, Phase::Updating),
            obs(2, Phase::Ready),
            obs(3, Phase::Ready),
        ];
        let plan = compute_plan(&bounds(1, 3, 10, 10), &items, 0);
        assert_eq!(plan.tally.updating, 1);
        assert_eq!(plan.tally.almost_ready(), 2);
        assert_eq!(plan.create, 1);
    }

    #[test]
    fn test_overflow_evicts_first_ready_in_order() {
        let items = vec![
            obs(1, Phase::InUse),
            obs(2, Phase::Ready),
            obs(3, Phase::Ready),
            obs(4, Phase::Ready),
        ];
        let plan = compute_plan(&bounds(0, 0, 2, 10), &items, 0);
        assert_eq!(plan.evict_overflow, vec![2, 3]);
    }

    #[test]
    fn test_overflow_only_evicts_ready() {
        let items = vec![
            obs(1, Phase::InUse),
            obs(2, Phase::InUse),
            obs(3, Phase::Creating),
            obs(4, Phase::Ready),
        ];
        let plan = compute_plan(&bounds(0, 0, 1, 10), &items, 0);
        assert_eq!(plan.evict_overflow, vec![4]);
    }

    #[test]
    fn test_ready_overflow() {
        let items: Vec<_> = (1..=5).map(|k| obs(k, Phase::Ready)).collect();
        let plan = compute_plan(&bounds(0, 0, 10, 3), &items, 0);
        assert_eq!(plan.evict_overflow, vec![1, 2]);
    }

    #[test]
    fn test_locked_and_leaving_are_ignored() {
        let mut locked = obs(1, Phase::Ready);
        locked.locked = true;
        let items = vec![locked, obs(2, Phase::Leaving), obs(3, Phase::Ready)];
        let plan = compute_plan(&bounds(1, 1, 1, 1), &items, 0);
        assert_eq!(plan.tally.total, 1);
        assert!(plan.evict_overflow.is_empty());
        assert!(plan.status().is_converged());
    }

    #[test]
    fn test_expired_ready_evicted_regardless_of_bounds() {
        let mut old = obs(1, Phase::Ready);
        old.age = Duration::from_secs(120);
        let mut old_in_use = obs(2, Phase::InUse);
        old_in_use.age = Duration::from_secs(120);
        let mut old_creating = obs(3, Phase::Creating);
        old_creating.age = Duration::from_secs(120);

        let plan = compute_plan(&bounds(5, 5, 10, 10), &[old, old_in_use, old_creating], 0);
        assert_eq!(plan.evict_expired, vec![1]);
        assert!(plan.evict_overflow.is_empty());
    }

    #[test]
    fn test_expired_not_duplicated_with_overflow() {
        let mut old = obs(1, Phase::Ready);
        old.age = Duration::from_secs(120);
        let items = vec![old, obs(2, Phase::Ready)];
        let plan = compute_plan(&bounds(0, 0, 1, 10), &items, 0);
        assert_eq!(plan.evict_overflow, vec![1]);
        assert!(plan.evict_expired.is_empty());
        assert_eq!(plan.evictions().count(), 1);
    }

    #[test]
    fn test_bounds_validation() {
        assert!(PoolBounds::default().validate().is_ok());
        assert!(bounds(3, 0, 2, 10).validate().is_err());
        assert!(bounds(0, 3, 10, 2).validate().is_err());
    }

    fn phase_strategy() -> impl Strategy<Value = Phase> {
        prop_oneof![
            Just(Phase::Creating),
            Just(Phase::Preparing),
            Just(Phase::Ready),
            Just(Phase::InUse),
            Just(Phase::Updating),
            Just(Phase::Leaving),
        ]
    }

    fn snapshot_strategy() -> impl Strategy<Value = Vec<Observation<usize>>> {
        prop::collection::vec((phase_strategy(), any::<bool>(), 0u64..200), 0..30).prop_map(
            |entries| {
                entries
                    .into_iter()
                    .enumerate()
                    .map(|(key, (phase, locked, age))| Observation {
                        key,
                        phase,
                        locked,
                        age: Duration::from_secs(age),
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn evictions_are_unlocked_ready_entries(
            items in snapshot_strategy(),
            max_total in 0usize..15,
            max_ready in 0usize..15,
        ) {
            let plan = compute_plan(&bounds(0, 0, max_total, max_ready), &items, 0);
            for key in plan.evictions() {
                let o = &items[*key];
                prop_assert_eq!(o.phase, Phase::Ready);
                prop_assert!(!o.locked);
            }
        }

        #[test]
        fn creation_covers_lower_bounds(
            items in snapshot_strategy(),
            min_total in 0usize..15,
            min_ready in 0usize..15,
            queued in 0usize..5,
        ) {
            let plan = compute_plan(&bounds(min_total, min_ready, 30, 30), &items, queued);
            let supply = plan.create + queued;
            prop_assert!(plan.tally.total + supply >= min_total);
            prop_assert!(plan.tally.almost_ready() + supply >= min_ready);
        }

        #[test]
        fn overflow_restores_upper_bounds_when_possible(
            items in snapshot_strategy(),
            max_total in 0usize..15,
            max_ready in 0usize..15,
        ) {
            let plan = compute_plan(&bounds(0, 0, max_total, max_ready), &items, 0);
            let evicted = plan.evict_overflow.len();
            prop_assert!(plan.tally.ready - evicted <= max_ready);
            if plan.tally.total - plan.tally.ready <= max_total {
                prop_assert!(plan.tally.total - evicted <= max_total);
            }
        }
    }
}
