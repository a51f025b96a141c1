//! Update Scheduling
//!
//! This module implements the batched update path: the flush queue that
//! coalesces watcher reruns, and the deferred-execution primitive that arms
//! one drain per turn of synchronous work.
//!
//! # Flow
//!
//! 1. A mutation notifies a dependency cell, which hands the affected
//!    watchers to the queue. Scheduling is synchronous — every notify is
//!    delivered before the mutating caller regains control.
//!
//! 2. The queue dedups by watcher id and arms a single deferred flush.
//!
//! 3. The flush reruns watchers in ascending id order. Watchers created
//!    earlier (parents) were assigned lower ids, so they run before the
//!    computations built on top of them.

mod next_tick;
mod queue;

pub use next_tick::{next_tick, next_tick_future, NextTickFuture};
pub use queue::on_flushed;

pub(crate) use queue::queue_watcher;
