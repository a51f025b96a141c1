//! Observed Containers
//!
//! This module implements the observer side of the engine: containers whose
//! reads register interest and whose writes broadcast change.
//!
//! # How Observation Works
//!
//! 1. [`ObservedMap`] gives every key its own dependency cell, plus one
//!    container-level dependency covering the key set itself (iteration,
//!    insertion, removal).
//!
//! 2. [`ObservedList`] owns a single dependency for the whole sequence.
//!    Mutations are intercepted at method level and notify exactly once per
//!    call, no matter how many elements moved.
//!
//! 3. Containers are created inert. [`observe`] marks them reactive;
//!    nested containers are marked lazily, when first read through an
//!    observed parent.
//!
//! Writes of a loosely-equal value are no-ops — no notify, no flush.

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error;

use super::dep::Dep;
use super::value::{loose_eq, Value};

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

struct ObserveGuard {
    saved: bool,
}

impl Drop for ObserveGuard {
    fn drop(&mut self) {
        SHOULD_OBSERVE.with(|flag| flag.set(self.saved));
    }
}

/// Run `f` with observation toggled on or off.
///
/// The previous setting is restored on exit. Turning observation off lets a
/// caller resolve values (defaults, snapshots) without marking the
/// containers it touches as reactive.
pub fn with_observing<R>(enabled: bool, f: impl FnOnce() -> R) -> R {
    let saved = SHOULD_OBSERVE.with(|flag| {
        let saved = flag.get();
        flag.set(enabled);
        saved
    });
    let _guard = ObserveGuard { saved };
    f()
}

fn should_observe() -> bool {
    SHOULD_OBSERVE.with(|flag| flag.get())
}

/// One key's storage: a dependency cell and the current value.
struct Slot {
    dep: Dep,
    value: RwLock<Value>,
}

impl Slot {
    fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            dep: Dep::new(),
            value: RwLock::new(value),
        })
    }
}

/// A reactive keyed container.
///
/// Cloning shares state: all clones see the same entries and the same
/// dependency cells.
#[derive(Clone)]
pub struct ObservedMap {
    inner: Arc<MapInner>,
}

struct MapInner {
    /// Container-level dependency: key insertion, removal, iteration.
    dep: Dep,
    slots: RwLock<IndexMap<String, Arc<Slot>>>,
    observed: AtomicBool,
    sealed: AtomicBool,
}

impl ObservedMap {
    pub fn new() -> Self {
        Self::from_entries(std::iter::empty())
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        let slots = entries
            .into_iter()
            .map(|(key, value)| (key, Slot::new(value)))
            .collect();
        Self {
            inner: Arc::new(MapInner {
                dep: Dep::new(),
                slots: RwLock::new(slots),
                observed: AtomicBool::new(false),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.inner.observed.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_observed(&self) {
        self.inner.observed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn dep_id(&self) -> u64 {
        self.inner.dep.id()
    }

    /// Mark the container non-extensible. Sealed containers are never
    /// observed and reject structural mutation.
    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::Relaxed);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Relaxed)
    }

    /// Read one key.
    ///
    /// Registers interest in the key's cell and lazily observes container
    /// values on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        let slot = self.inner.slots.read().get(key).cloned()?;
        let value = slot.value.read().clone();
        if self.is_observed() {
            slot.dep.depend();
            observe_child(&value);
        }
        Some(value)
    }

    /// Read one key without tracking or lazy observation.
    pub(crate) fn get_untracked(&self, key: &str) -> Option<Value> {
        self.inner
            .slots
            .read()
            .get(key)
            .map(|slot| slot.value.read().clone())
    }

    /// Write one key, or add a new one.
    ///
    /// This is the explicit mutation entry point for keys unknown at
    /// observation time. Writing a loosely-equal value is a no-op. Adding a
    /// key notifies the container-level dependency; overwriting an existing
    /// key notifies that key's cell. Returns `false` when the container is
    /// sealed and the key is new.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        let existing = self.inner.slots.read().get(&key).cloned();
        if let Some(slot) = existing {
            let current = slot.value.read().clone();
            if loose_eq(&current, &value) {
                return true;
            }
            *slot.value.write() = value.clone();
            if self.is_observed() {
                observe_child(&value);
                slot.dep.notify();
            }
            return true;
        }

        if self.is_sealed() {
            error::warn("ObservedMap::insert", "cannot add a key to a sealed container");
            return false;
        }
        self.inner.slots.write().insert(key, Slot::new(value.clone()));
        if self.is_observed() {
            observe_child(&value);
            self.inner.dep.notify();
        }
        true
    }

    /// Remove a key. Notifies the container-level dependency when the key
    /// was present.
    pub fn remove(&self, key: &str) -> Option<Value> {
        if self.is_sealed() {
            error::warn("ObservedMap::remove", "cannot remove a key from a sealed container");
            return None;
        }
        let removed = self.inner.slots.write().shift_remove(key)?;
        let value = removed.value.read().clone();
        if self.is_observed() {
            self.inner.dep.notify();
        }
        Some(value)
    }

    /// Number of keys. Tracked through the container-level dependency.
    pub fn len(&self) -> usize {
        if self.is_observed() {
            self.inner.dep.depend();
        }
        self.inner.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        if self.is_observed() {
            self.inner.dep.depend();
        }
        self.inner.slots.read().contains_key(key)
    }

    /// Snapshot of the key set, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        if self.is_observed() {
            self.inner.dep.depend();
        }
        self.inner.slots.read().keys().cloned().collect()
    }

    pub(crate) fn keys_untracked(&self) -> Vec<String> {
        self.inner.slots.read().keys().cloned().collect()
    }

    pub(crate) fn len_untracked(&self) -> usize {
        self.inner.slots.read().len()
    }
}

impl Default for ObservedMap {
    fn default() -> Self {
        Self::new()
    }
}

/// A reactive sequence.
///
/// The whole sequence shares one owning dependency. Reads register interest
/// in it; mutation methods notify it exactly once per call.
#[derive(Clone)]
pub struct ObservedList {
    inner: Arc<ListInner>,
}

struct ListInner {
    dep: Dep,
    items: RwLock<Vec<Value>>,
    observed: AtomicBool,
    sealed: AtomicBool,
}

impl ObservedList {
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn from_values(items: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(ListInner {
                dep: Dep::new(),
                items: RwLock::new(items),
                observed: AtomicBool::new(false),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.inner.observed.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_observed(&self) {
        self.inner.observed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn dep_id(&self) -> u64 {
        self.inner.dep.id()
    }

    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::Relaxed);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Relaxed)
    }

    fn reject_sealed(&self, source: &str) -> bool {
        if self.is_sealed() {
            error::warn(source, "cannot mutate a sealed sequence");
            return true;
        }
        false
    }

    /// Read one position. Registers interest in the sequence's dependency
    /// and lazily observes container elements on the way out.
    pub fn get(&self, index: usize) -> Option<Value> {
        if self.is_observed() {
            self.inner.dep.depend();
        }
        let value = self.inner.items.read().get(index).cloned()?;
        if self.is_observed() {
            observe_child(&value);
        }
        Some(value)
    }

    /// Number of elements. Tracked through the sequence's dependency.
    pub fn len(&self) -> usize {
        if self.is_observed() {
            self.inner.dep.depend();
        }
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current elements.
    pub fn snapshot(&self) -> Vec<Value> {
        if self.is_observed() {
            self.inner.dep.depend();
        }
        let items = self.inner.items.read().clone();
        if self.is_observed() {
            for item in &items {
                observe_child(item);
            }
        }
        items
    }

    pub(crate) fn items_untracked(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }

    pub(crate) fn len_untracked(&self) -> usize {
        self.inner.items.read().len()
    }

    pub fn push(&self, value: Value) {
        if self.reject_sealed("ObservedList::push") {
            return;
        }
        if self.is_observed() {
            observe_child(&value);
        }
        self.inner.items.write().push(value);
        if self.is_observed() {
            self.inner.dep.notify();
        }
    }

    pub fn pop(&self) -> Option<Value> {
        if self.reject_sealed("ObservedList::pop") {
            return None;
        }
        let value = self.inner.items.write().pop()?;
        if self.is_observed() {
            self.inner.dep.notify();
        }
        Some(value)
    }

    /// Insert at `index`, shifting later elements. Out-of-range indices are
    /// rejected.
    pub fn insert(&self, index: usize, value: Value) -> bool {
        if self.reject_sealed("ObservedList::insert") {
            return false;
        }
        {
            let mut items = self.inner.items.write();
            if index > items.len() {
                return false;
            }
            items.insert(index, value.clone());
        }
        if self.is_observed() {
            observe_child(&value);
            self.inner.dep.notify();
        }
        true
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        if self.reject_sealed("ObservedList::remove") {
            return None;
        }
        let value = {
            let mut items = self.inner.items.write();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        if self.is_observed() {
            self.inner.dep.notify();
        }
        Some(value)
    }

    /// Write one position (a one-element splice). Writing a loosely-equal
    /// value is a no-op; out-of-range indices are rejected.
    pub fn set(&self, index: usize, value: Value) -> bool {
        if self.reject_sealed("ObservedList::set") {
            return false;
        }
        let current = match self.inner.items.read().get(index) {
            Some(current) => current.clone(),
            None => return false,
        };
        if loose_eq(&current, &value) {
            return true;
        }
        if self.is_observed() {
            observe_child(&value);
        }
        self.inner.items.write()[index] = value;
        if self.is_observed() {
            self.inner.dep.notify();
        }
        true
    }

    /// Remove `delete_count` elements at `start`, inserting `new_items` in
    /// their place. Returns the removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, new_items: Vec<Value>) -> Vec<Value> {
        if self.reject_sealed("ObservedList::splice") {
            return Vec::new();
        }
        if self.is_observed() {
            for value in &new_items {
                observe_child(value);
            }
        }
        let removed: Vec<Value> = {
            let mut items = self.inner.items.write();
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            items.splice(start..end, new_items).collect()
        };
        if self.is_observed() {
            self.inner.dep.notify();
        }
        removed
    }

    pub fn clear(&self) {
        if self.reject_sealed("ObservedList::clear") {
            return;
        }
        let was_empty = {
            let mut items = self.inner.items.write();
            let was_empty = items.is_empty();
            items.clear();
            was_empty
        };
        if !was_empty && self.is_observed() {
            self.inner.dep.notify();
        }
    }

    pub fn reverse(&self) {
        if self.reject_sealed("ObservedList::reverse") {
            return;
        }
        self.inner.items.write().reverse();
        if self.is_observed() {
            self.inner.dep.notify();
        }
    }
}

impl Default for ObservedList {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`observe`].
#[derive(Clone)]
pub enum ObservedRef {
    Map(ObservedMap),
    List(ObservedList),
}

impl ObservedRef {
    pub fn as_map(&self) -> Option<&ObservedMap> {
        match self {
            ObservedRef::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservedList> {
        match self {
            ObservedRef::List(list) => Some(list),
            _ => None,
        }
    }
}

/// Make a value reactive.
///
/// Primitives, `Raw` payloads, sealed containers, and calls made while
/// observation is suspended yield `None`. A container is marked at most
/// once — observing an already-observed container returns the same logical
/// handle, never a second wrapping. Observation is shallow here; nested
/// containers are observed when first read.
pub fn observe(value: &Value) -> Option<ObservedRef> {
    match value {
        Value::Map(map) => {
            if map.is_observed() {
                return Some(ObservedRef::Map(map.clone()));
            }
            if !should_observe() || map.is_sealed() {
                return None;
            }
            map.mark_observed();
            Some(ObservedRef::Map(map.clone()))
        }
        Value::List(list) => {
            if list.is_observed() {
                return Some(ObservedRef::List(list.clone()));
            }
            if !should_observe() || list.is_sealed() {
                return None;
            }
            list.mark_observed();
            Some(ObservedRef::List(list.clone()))
        }
        _ => None,
    }
}

/// Observe a value reached through an observed parent, discarding the
/// handle. Read paths and write paths use this for lazy deep observation.
fn observe_child(value: &Value) {
    let _ = observe(value);
}

/// Recursively read every reachable slot, registering the active watcher
/// with each dependency along the way. Used by deep watchers. Cycles are
/// cut on container dependency ids.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<u64>) {
    match value {
        Value::Map(map) => {
            if !seen.insert(map.dep_id()) {
                return;
            }
            for key in map.keys() {
                if let Some(child) = map.get(&key) {
                    traverse_inner(&child, seen);
                }
            }
        }
        Value::List(list) => {
            if !seen.insert(list.dep_id()) {
                return;
            }
            for item in list.snapshot() {
                traverse_inner(&item, seen);
            }
        }
        _ => {}
    }
}
