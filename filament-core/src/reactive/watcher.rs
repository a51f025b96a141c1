//! Watchers
//!
//! A Watcher is a unit of reactive computation: a getter expression, the
//! dependencies it touched on its last run, and a cached value. It is both
//! a reader (it attaches to dependency cells during evaluation) and a
//! reaction (it is invoked when one of those cells broadcasts).
//!
//! # Modes
//!
//! - Default: reruns are handed to the batched scheduler and coalesced into
//!   the next flush.
//! - `sync`: reruns happen inline, inside the notify that triggered them.
//! - `lazy`: a notify only marks the watcher dirty; the next `evaluate`
//!   call catches up. Useful for derived values that are read on demand.
//!
//! # Dependency reconciliation
//!
//! Every evaluation collects the dependencies it actually touched into an
//! in-progress set. Afterwards the previous set is reconciled against it:
//! cells no longer read are unsubscribed, cells newly read were already
//! subscribed during the run. A getter that reads `a ? b : c` therefore
//! tracks `{a, b}` on truthy runs and `{a, c}` on falsy ones — never the
//! superset.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::error::{self, DynError, Phase};
use crate::schedule;

use super::context::{untracked, TrackingScope};
use super::dep::Dep;
use super::observe::traverse;
use super::value::{loose_eq, Value};

/// Counter for generating unique watcher IDs. IDs define flush ordering:
/// watchers created earlier run earlier.
static WATCHER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_watcher_id() -> u64 {
    WATCHER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Getter = dyn Fn() -> Result<Value, DynError> + Send + Sync;
type ChangeCallback = dyn Fn(&Value, &Value) -> Result<(), DynError> + Send + Sync;
type Hook = dyn Fn() + Send + Sync;
type ErrorHook = dyn Fn(&DynError, Phase) + Send + Sync;

/// Construction options for a watcher.
pub struct WatcherOptions {
    /// Defer the first evaluation until the value is requested.
    pub lazy: bool,

    /// Bypass the scheduler queue: rerun synchronously on notify.
    pub sync: bool,

    /// Traverse the computed value so mutations anywhere inside nested
    /// containers retrigger this watcher.
    pub deep: bool,

    /// Hook run immediately before this watcher's reaction during a flush.
    pub before: Option<Box<Hook>>,

    /// Per-watcher error sink. When unset, errors go to the global report.
    pub on_error: Option<Box<ErrorHook>>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            lazy: false,
            sync: false,
            deep: false,
            before: None,
            on_error: None,
        }
    }
}

struct DepSets {
    /// Dependencies from the most recent completed evaluation.
    deps: SmallVec<[Dep; 4]>,
    dep_ids: HashSet<u64>,
    /// Dependencies accumulated by the in-progress evaluation.
    new_deps: SmallVec<[Dep; 4]>,
    new_dep_ids: HashSet<u64>,
}

/// A unit of reactive computation.
pub struct Watcher {
    id: u64,
    desc: String,
    lazy: bool,
    sync: bool,
    deep: bool,
    active: AtomicBool,
    dirty: AtomicBool,
    getter: Box<Getter>,
    callback: Option<Box<ChangeCallback>>,
    before: Option<Box<Hook>>,
    on_error: Option<Box<ErrorHook>>,
    value: RwLock<Value>,
    deps: Mutex<DepSets>,
}

impl Watcher {
    /// Create a watcher with no change callback.
    ///
    /// Unless `lazy`, the getter runs once immediately to establish the
    /// initial value and dependencies.
    pub fn new(
        desc: impl Into<String>,
        getter: impl Fn() -> Result<Value, DynError> + Send + Sync + 'static,
        options: WatcherOptions,
    ) -> Arc<Self> {
        Self::build(desc.into(), Box::new(getter), None, options)
    }

    /// Create a watcher whose callback observes value transitions.
    ///
    /// The callback receives `(new, old)` and fires when the recomputed
    /// value is not loosely equal to the previous one (containers always
    /// fire — their contents may have mutated in place).
    pub fn watch(
        desc: impl Into<String>,
        getter: impl Fn() -> Result<Value, DynError> + Send + Sync + 'static,
        callback: impl Fn(&Value, &Value) -> Result<(), DynError> + Send + Sync + 'static,
        options: WatcherOptions,
    ) -> Arc<Self> {
        Self::build(desc.into(), Box::new(getter), Some(Box::new(callback)), options)
    }

    fn build(
        desc: String,
        getter: Box<Getter>,
        callback: Option<Box<ChangeCallback>>,
        options: WatcherOptions,
    ) -> Arc<Self> {
        let watcher = Arc::new(Self {
            id: next_watcher_id(),
            desc,
            lazy: options.lazy,
            sync: options.sync,
            deep: options.deep,
            active: AtomicBool::new(true),
            dirty: AtomicBool::new(options.lazy),
            getter,
            callback,
            before: options.before,
            on_error: options.on_error,
            value: RwLock::new(Value::Null),
            deps: Mutex::new(DepSets {
                deps: SmallVec::new(),
                dep_ids: HashSet::new(),
                new_deps: SmallVec::new(),
                new_dep_ids: HashSet::new(),
            }),
        });
        if !watcher.lazy {
            let value = watcher.get();
            *watcher.value.write() = value;
        }
        watcher
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether a lazy watcher needs recomputation.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// The cached value. Reads do not register dependencies.
    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    /// Number of dependencies tracked by the last completed evaluation.
    pub fn dep_count(&self) -> usize {
        self.deps.lock().deps.len()
    }

    /// Evaluate the getter inside a tracking frame, then reconcile the
    /// dependency sets.
    ///
    /// A failed evaluation is reported and yields the previous value; the
    /// watcher stays subscribed to whatever the failed run managed to read
    /// and remains schedulable.
    fn get(self: &Arc<Self>) -> Value {
        let result = {
            let _scope = TrackingScope::enter(Some(self.clone()));
            let result = (self.getter)();
            if self.deep {
                if let Ok(value) = &result {
                    traverse(value);
                }
            }
            result
        };
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                self.handle_error(&err, Phase::Evaluation);
                self.value()
            }
        };
        self.cleanup_deps();
        value
    }

    /// Record interest in a dependency. Idempotent within one evaluation;
    /// subscribes to the cell only if the previous run was not already
    /// subscribed.
    pub(crate) fn add_dep(self: &Arc<Self>, dep: &Dep) {
        let mut sets = self.deps.lock();
        let id = dep.id();
        if sets.new_dep_ids.contains(&id) {
            return;
        }
        sets.new_dep_ids.insert(id);
        sets.new_deps.push(dep.clone());
        if !sets.dep_ids.contains(&id) {
            dep.add_sub(self);
        }
    }

    /// Unsubscribe from cells this run no longer touched, then promote the
    /// in-progress set to current.
    fn cleanup_deps(&self) {
        let mut sets = self.deps.lock();
        let DepSets {
            deps,
            dep_ids,
            new_deps,
            new_dep_ids,
        } = &mut *sets;
        for dep in deps.iter() {
            if !new_dep_ids.contains(&dep.id()) {
                dep.remove_sub(self.id);
            }
        }
        std::mem::swap(deps, new_deps);
        std::mem::swap(dep_ids, new_dep_ids);
        new_deps.clear();
        new_dep_ids.clear();
    }

    /// React to a dependency broadcast.
    pub(crate) fn update(self: &Arc<Self>) {
        if self.lazy {
            self.dirty.store(true, Ordering::Release);
        } else if self.sync {
            self.run();
        } else {
            schedule::queue_watcher(self.clone());
        }
    }

    /// Re-evaluate and fire the change callback. No-op once torn down.
    pub(crate) fn run(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let value = self.get();
        let old = {
            let mut guard = self.value.write();
            let old = guard.clone();
            *guard = value.clone();
            old
        };
        let changed = self.deep || value.is_container() || !loose_eq(&value, &old);
        if changed {
            if let Some(callback) = &self.callback {
                if let Err(err) = callback(&value, &old) {
                    self.handle_error(&err, Phase::Reaction);
                }
            }
        }
    }

    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.before {
            before();
        }
    }

    /// Lazy catch-up: recompute only when dirty. Evaluating a clean watcher
    /// returns the cache without any tracking side effects.
    pub fn evaluate(self: &Arc<Self>) -> Value {
        if self.dirty.swap(false, Ordering::AcqRel) {
            let value = self.get();
            *self.value.write() = value;
        }
        self.value()
    }

    /// Re-register every tracked dependency with the active context, so an
    /// outer computation inherits a lazy watcher's dependencies.
    pub fn depend(&self) {
        let deps: SmallVec<[Dep; 4]> = self.deps.lock().deps.clone();
        for dep in deps {
            dep.depend();
        }
    }

    /// Detach from every dependency and deactivate. Idempotent.
    ///
    /// A watcher that was already queued when torn down still has its
    /// reaction invoked once; the inactive flag turns it into a no-op.
    pub fn teardown(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut sets = self.deps.lock();
        for dep in sets.deps.iter() {
            dep.remove_sub(self.id);
        }
        sets.deps.clear();
        sets.dep_ids.clear();
        sets.new_deps.clear();
        sets.new_dep_ids.clear();
    }

    pub(crate) fn handle_error(&self, err: &DynError, phase: Phase) {
        if let Some(hook) = &self.on_error {
            untracked(|| hook(err, phase));
        } else {
            error::report(err, &self.desc, phase);
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("active", &self.is_active())
            .field("dirty", &self.is_dirty())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}
