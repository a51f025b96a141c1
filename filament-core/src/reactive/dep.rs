//! Dependency Cells
//!
//! A `Dep` is the broadcast channel for one observable slot. It holds the
//! set of watchers interested in the slot and knows nothing about
//! scheduling: `notify` simply asks each subscriber to update, and the
//! watcher's mode decides what that means.
//!
//! Subscribers are held as weak references. A torn-down watcher removes
//! itself eagerly; a dropped one is pruned at the next notify. Either way a
//! `Dep` can never keep a dead watcher alive or deliver to one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::config;

use super::context;
use super::watcher::Watcher;

/// Counter for generating unique dep IDs. IDs are a tie-break only and
/// carry no semantic meaning.
static DEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_dep_id() -> u64 {
    DEP_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A broadcast channel for one observable slot.
///
/// Cloning shares the subscriber table.
#[derive(Clone)]
pub(crate) struct Dep {
    inner: Arc<DepInner>,
}

struct DepInner {
    id: u64,

    /// Subscribers keyed by watcher id. Insertion-ordered, so iteration is
    /// deterministic; at most one entry per watcher.
    subs: RwLock<IndexMap<u64, Weak<Watcher>>>,
}

impl Dep {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                id: next_dep_id(),
                subs: RwLock::new(IndexMap::new()),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Register the tracking context's current watcher as interested.
    ///
    /// Untracked reads are silently ignored. The watcher performs the
    /// symmetric registration (and the idempotence check) in `add_dep`.
    pub(crate) fn depend(&self) {
        if let Some(watcher) = context::current_watcher() {
            watcher.add_dep(self);
        }
    }

    pub(crate) fn add_sub(&self, watcher: &Arc<Watcher>) {
        self.inner
            .subs
            .write()
            .insert(watcher.id(), Arc::downgrade(watcher));
    }

    pub(crate) fn remove_sub(&self, watcher_id: u64) {
        self.inner.subs.write().shift_remove(&watcher_id);
    }

    /// Broadcast a change: ask every live subscriber to update.
    ///
    /// The subscriber set is snapshotted (and pruned of dead entries) before
    /// any update runs — a sync-mode watcher may resubscribe to this very
    /// dep mid-notify.
    pub(crate) fn notify(&self) {
        let mut subs: Vec<Arc<Watcher>> = {
            let mut table = self.inner.subs.write();
            table.retain(|_, weak| weak.strong_count() > 0);
            table.values().filter_map(Weak::upgrade).collect()
        };
        if !config::get().async_updates {
            // Synchronous flushes drain one watcher at a time, so delivery
            // order is run order; keep it ascending by id.
            subs.sort_by_key(|watcher| watcher.id());
        }
        for watcher in subs {
            watcher.update();
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.inner.subs.read().len()
    }
}
