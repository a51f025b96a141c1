//! Error Taxonomy and Reporting
//!
//! User-supplied closures (getters, change callbacks, deferred callbacks)
//! return explicit results instead of panicking. Every boundary funnels its
//! failures through [`report`] with enough context to locate the offending
//! computation: which watcher, which phase.
//!
//! None of the error classes terminate the process. A watcher whose getter
//! fails keeps its previous value and stays schedulable.

use std::error::Error;
use std::fmt;

use thiserror::Error as ThisError;

use crate::config;
use crate::reactive::untracked;

/// Boundary error type for user-supplied closures.
pub type DynError = Box<dyn Error + Send + Sync + 'static>;

/// Which boundary an error crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// A getter failed during evaluation.
    Evaluation,
    /// A change callback failed while reacting to an update.
    Reaction,
    /// A flushed-hook failed after a scheduler pass.
    Flush,
    /// A deferred callback failed while a next-tick batch drained.
    DeferredCallback,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Evaluation => "evaluation",
            Phase::Reaction => "reaction",
            Phase::Flush => "flush",
            Phase::DeferredCallback => "deferred callback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the engine itself.
#[derive(Debug, ThisError)]
pub enum ReactiveError {
    /// A watcher kept re-triggering itself within a single flush.
    #[error("infinite update loop in watcher \"{watcher}\" (aborted after {limit} reruns in one flush)")]
    InfiniteUpdate { watcher: String, limit: u32 },
}

/// Report an error through the configured sink.
///
/// Dependency tracking is suspended while handlers run, so a handler that
/// reads reactive state cannot re-enter the evaluation that failed.
pub fn report(err: &DynError, source: &str, phase: Phase) {
    untracked(|| {
        if let Some(handler) = config::get().error_handler {
            handler(err, source, phase);
            return;
        }
        tracing::error!(target: "filament", phase = %phase, source, error = %err, "reactive error");
    });
}

/// Warn through tracing unless warnings are silenced.
pub(crate) fn warn(source: &str, message: &str) {
    if !config::get().silent {
        tracing::warn!(target: "filament", source, "{message}");
    }
}
