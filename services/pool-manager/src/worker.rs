//! Background loops driving a pool.
//!
//! Each pool runs three of them: the reconciler, the creation worker and the
//! deletion worker. They hold a weak reference so that dropping the last
//! [`Pool`] handle ends them even without an explicit stop.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::pool::{Pool, PoolInner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerKind {
    Reconciler,
    Creation,
    Deletion,
}

impl WorkerKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Reconciler => "reconciler",
            Self::Creation => "creation",
            Self::Deletion => "deletion",
        }
    }
}

/// Run one background loop until shutdown is signalled or the pool is gone.
///
/// The loop wakes on every `period` tick and, when `wake` is set, whenever
/// the pool signals new work. The first tick fires immediately.
pub(crate) async fn run_worker<V>(
    kind: WorkerKind,
    weak: Weak<PoolInner<V>>,
    period: Duration,
    wake: Option<Arc<Notify>>,
    mut shutdown: watch::Receiver<bool>,
) where
    V: Clone + Send + Sync + 'static,
{
    debug!(
        worker = kind.as_str(),
        period_ms = period.as_millis() as u64,
        "Starting pool worker"
    );

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || is_stopping(&shutdown) {
                    break;
                }
                continue;
            }
            _ = notified(wake.as_deref()) => {}
            _ = interval.tick() => {}
        }

        let Some(inner) = weak.upgrade() else {
            break;
        };
        let pool = Pool::from_inner(inner);

        match kind {
            WorkerKind::Reconciler => {
                pool.reconcile_once();
            }
            WorkerKind::Creation => {
                while !is_stopping(&shutdown) && pool.create_next().await {}
            }
            WorkerKind::Deletion => {
                while !is_stopping(&shutdown) && pool.delete_next().await {}
            }
        }
    }

    info!(worker = kind.as_str(), "Pool worker shutting down");
}

async fn notified(wake: Option<&Notify>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

fn is_stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
