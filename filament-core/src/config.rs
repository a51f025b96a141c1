//! Runtime Configuration
//!
//! A single process-wide configuration controls the knobs embedders tune:
//! warning output, synchronous-flush mode for test harnesses, and the
//! error sink.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{DynError, Phase};

/// Global error sink override. Receives the error, a description of the
/// computation it came from, and the phase it crossed.
pub type ErrorHandler = Arc<dyn Fn(&DynError, &str, Phase) + Send + Sync>;

/// Process-wide engine configuration.
#[derive(Clone)]
pub struct Config {
    /// Suppress warning output.
    pub silent: bool,

    /// When false, queued watchers flush synchronously instead of in a
    /// deferred batch. Intended for test harnesses; significantly slower
    /// for real workloads.
    pub async_updates: bool,

    /// Optional sink for reactive errors. When unset, errors are logged.
    pub error_handler: Option<ErrorHandler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            async_updates: true,
            error_handler: None,
        }
    }
}

fn config() -> &'static RwLock<Config> {
    static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(Config::default()))
}

/// Snapshot the current configuration.
pub fn get() -> Config {
    config().read().clone()
}

/// Suppress or re-enable warning output.
pub fn set_silent(silent: bool) {
    config().write().silent = silent;
}

/// Toggle deferred flushing. `false` drains the queue synchronously as
/// watchers are scheduled.
pub fn set_async_updates(enabled: bool) {
    config().write().async_updates = enabled;
}

/// Install or clear the global error handler.
pub fn set_error_handler(handler: Option<ErrorHandler>) {
    config().write().error_handler = handler;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert!(!cfg.silent);
        assert!(cfg.async_updates);
        assert!(cfg.error_handler.is_none());
    }
}
