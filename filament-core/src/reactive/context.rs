//! Tracking Context Stack
//!
//! The tracking context records which watcher is currently evaluating.
//! This enables automatic dependency tracking: when an observed slot is
//! read, we can register the current watcher as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. When a watcher starts evaluating,
//! it pushes itself onto the stack; when the evaluation completes, the frame
//! pops. A `None` frame suspends tracking entirely — reads performed under
//! it are silently ignored. This supports nested evaluation (a getter that
//! evaluates another watcher) as well as error-handling sections that must
//! not accrue dependencies.

use std::cell::RefCell;
use std::sync::Arc;

use super::watcher::Watcher;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Arc<Watcher>>>> = RefCell::new(Vec::new());
}

/// Guard that pops the tracking frame when dropped.
///
/// This keeps the stack balanced across early returns from a getter.
pub(crate) struct TrackingScope {
    _private: (),
}

impl TrackingScope {
    /// Push a tracking frame. `Some` credits reads to that watcher; `None`
    /// suspends tracking until the guard drops.
    pub(crate) fn enter(target: Option<Arc<Watcher>>) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(target));
        Self { _private: () }
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The watcher currently receiving credit for reads, if any.
pub(crate) fn current_watcher() -> Option<Arc<Watcher>> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Whether reads are currently being tracked.
pub fn is_tracking() -> bool {
    CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Run `f` with dependency tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = TrackingScope::enter(None);
    f()
}
