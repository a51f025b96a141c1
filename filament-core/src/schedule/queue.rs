//! Flush Queue
//!
//! The queue orders pending watcher reruns, deduplicates repeated triggers
//! within one flush window, and defers the actual flush to the next drain
//! of the tick batch.
//!
//! # Algorithm
//!
//! 1. `queue_watcher` drops duplicates by id. Outside a flush, new entries
//!    append; the flush sorts before running.
//!
//! 2. During a flush, a new entry is inserted so it still runs in this
//!    flush: the insertion point keeps ascending id order among entries
//!    after the live cursor, and an id at or below the current watcher's
//!    lands right after the cursor.
//!
//! 3. A watcher that keeps re-queueing itself inside one flush trips a
//!    circuit breaker after [`MAX_UPDATE_COUNT`] reruns. Only that watcher
//!    is aborted; the flush continues for everything else.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::config;
use crate::error::{self, DynError, Phase, ReactiveError};
use crate::reactive::Watcher;

use super::next_tick;

/// Rerun limit for a single watcher within one flush.
pub(crate) const MAX_UPDATE_COUNT: u32 = 100;

type FlushedHook = Box<dyn FnOnce() -> Result<(), DynError> + Send>;

#[derive(Default)]
struct QueueState {
    queue: Vec<Arc<Watcher>>,
    /// Pending watcher ids (dedup within one flush window).
    has: HashSet<u64>,
    /// Reruns per watcher within the current flush.
    circular: HashMap<u64, u32>,
    flushed_hooks: Vec<FlushedHook>,
    waiting: bool,
    flushing: bool,
    /// Live cursor into `queue` during a flush.
    index: usize,
}

fn state() -> &'static Mutex<QueueState> {
    static STATE: OnceLock<Mutex<QueueState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(QueueState::default()))
}

/// Queue a watcher for the next flush, arming one if none is armed.
pub(crate) fn queue_watcher(watcher: Arc<Watcher>) {
    if !enqueue(watcher) {
        return;
    }
    arm();
}

/// Insert into the pending set without arming. Returns `false` when the
/// watcher is already pending.
fn enqueue(watcher: Arc<Watcher>) -> bool {
    let mut st = state().lock();
    let id = watcher.id();
    if st.has.contains(&id) {
        return false;
    }
    st.has.insert(id);
    if !st.flushing {
        st.queue.push(watcher);
    } else {
        let mut pos = st.queue.len();
        while pos > st.index + 1 && st.queue[pos - 1].id() > id {
            pos -= 1;
        }
        st.queue.insert(pos, watcher);
    }
    true
}

fn arm() {
    let should_arm = {
        let mut st = state().lock();
        if st.waiting {
            false
        } else {
            st.waiting = true;
            true
        }
    };
    if !should_arm {
        return;
    }
    if config::get().async_updates {
        next_tick::defer(flush);
    } else {
        flush();
    }
}

/// Drain the queue: rerun every pending watcher in ascending id order.
///
/// Reentrant scheduling is expected — a reaction may mutate state, which
/// inserts into the live queue through `enqueue`. The queue lock is never
/// held across a watcher rerun, and the end-of-pass reset happens under the
/// same lock as the emptiness check so a late insertion is either processed
/// by this pass or left for a freshly armed one.
pub(crate) fn flush() {
    {
        let mut st = state().lock();
        if st.flushing {
            return;
        }
        st.flushing = true;
        st.queue.sort_by_key(|watcher| watcher.id());
        st.index = 0;
    }

    let hooks = loop {
        let watcher = {
            let mut st = state().lock();
            if st.index >= st.queue.len() {
                st.queue.clear();
                st.has.clear();
                st.circular.clear();
                st.waiting = false;
                st.flushing = false;
                st.index = 0;
                break std::mem::take(&mut st.flushed_hooks);
            }
            st.queue[st.index].clone()
        };
        let id = watcher.id();

        watcher.call_before();
        state().lock().has.remove(&id);
        watcher.run();

        // A re-queue while running means this watcher triggered itself.
        let tripped = {
            let mut st = state().lock();
            let mut tripped = false;
            if st.has.contains(&id) {
                let count = st.circular.entry(id).or_insert(0);
                *count += 1;
                if *count > MAX_UPDATE_COUNT {
                    st.has.remove(&id);
                    let cursor = st.index;
                    if let Some(pos) = st
                        .queue
                        .iter()
                        .skip(cursor + 1)
                        .position(|queued| queued.id() == id)
                    {
                        st.queue.remove(cursor + 1 + pos);
                    }
                    tripped = true;
                }
            }
            st.index += 1;
            tripped
        };
        if tripped {
            let err: DynError = Box::new(ReactiveError::InfiniteUpdate {
                watcher: watcher.desc().to_string(),
                limit: MAX_UPDATE_COUNT,
            });
            watcher.handle_error(&err, Phase::Reaction);
        }
    };

    for hook in hooks {
        if let Err(err) = hook() {
            error::report(&err, "flushed hook", Phase::Flush);
        }
    }
}

/// Queue a callback to run after the in-progress (or next) watcher pass.
///
/// Errors are isolated per hook and reported through the usual sink.
pub fn on_flushed(hook: impl FnOnce() -> Result<(), DynError> + Send + 'static) {
    {
        let mut st = state().lock();
        st.flushed_hooks.push(Box::new(hook));
        if st.flushing || st.waiting {
            return;
        }
        st.waiting = true;
    }
    if config::get().async_updates {
        next_tick::defer(flush);
    } else {
        flush();
    }
}
