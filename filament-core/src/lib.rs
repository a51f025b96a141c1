//! Filament Core
//!
//! This crate provides the core runtime for the Filament reactive state
//! framework. It implements:
//!
//! - Fine-grained dependency tracking (observed containers, watchers)
//! - A batched, deferred update scheduler
//! - A tiered deferred-execution primitive (`next_tick`)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Observed values, dependency cells, and watchers
//! - `schedule`: The flush queue and the deferred-execution backend
//! - `error`: The error taxonomy and the uniform reporting sink
//! - `config`: Process-wide runtime configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::{observe, next_tick_future, ObservedMap, Value, Watcher, WatcherOptions};
//!
//! // Build a reactive container
//! let state = ObservedMap::new();
//! state.insert("count", Value::Int(0));
//! observe(&Value::Map(state.clone()));
//!
//! // Watch a derived value
//! let reader = state.clone();
//! let doubled = Watcher::new(
//!     "doubled",
//!     move || Ok(Value::Int(reader.get("count").and_then(|v| v.as_i64()).unwrap_or(0) * 2)),
//!     WatcherOptions::default(),
//! );
//!
//! // Mutate; the watcher re-runs in the next flush
//! state.insert("count", Value::Int(5));
//! next_tick_future().await;
//! assert_eq!(doubled.value().as_i64(), Some(10));
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod schedule;

pub use error::{report, DynError, Phase, ReactiveError};
pub use reactive::{
    is_tracking, loose_eq, observe, traverse, untracked, with_observing, ObservedList,
    ObservedMap, ObservedRef, Value, Watcher, WatcherOptions,
};
pub use schedule::{next_tick, next_tick_future, on_flushed, NextTickFuture};
