//! Reactive Primitives
//!
//! This module implements the core reactive system: observed containers,
//! dependency cells, and watchers. These primitives form the foundation of
//! Filament's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Observed containers
//!
//! [`ObservedMap`] and [`ObservedList`] hold mutable state. When a slot is
//! read within a tracking context (a watcher evaluation), the slot's
//! dependency cell records that watcher as a subscriber. When the slot
//! changes, all subscribers are notified.
//!
//! ## Watchers
//!
//! A [`Watcher`] is a unit of reactive computation: a getter, the
//! dependencies it touched on its last run, and a cached value. Lazy
//! watchers defer recomputation until the value is requested; sync watchers
//! rerun inline on notify; the default mode hands reruns to the batched
//! scheduler.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking stack to automatically
//! detect dependencies. When a slot is read, we check if there is an active
//! tracking frame and, if so, register the dependency. A `None` frame
//! suspends tracking for reentrant sections.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue, and Leptos.

mod context;
mod dep;
mod observe;
mod value;
mod watcher;

pub use context::{is_tracking, untracked};
pub use observe::{observe, traverse, with_observing, ObservedList, ObservedMap, ObservedRef};
pub use value::{loose_eq, Value};
pub use watcher::{Watcher, WatcherOptions};
