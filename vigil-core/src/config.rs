//! Engine Configuration
//!
//! Runtime knobs for the engine: whether flushes are batched onto the next
//! tick, how many times a watcher may re-queue itself inside one flush, and
//! where errors and warnings are reported.
//!
//! Configuration is stored per thread, like the rest of the engine state.
//! The serializable part can be loaded from JSON; the handlers are installed
//! programmatically.
//!
//! ```rust,ignore
//! use vigil_core::config::{self, Config};
//!
//! config::set(Config::from_json(r#"{ "async": false }"#)?);
//! config::update(|c| c.silent = true);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Callback invoked with every reported error and a short description of
/// where it happened.
pub type ErrorHandler = Arc<dyn Fn(&ReactiveError, &str) + Send + Sync>;

/// Callback invoked with every warning message.
pub type WarnHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Default number of re-runs a single watcher may trigger within one flush
/// before it is treated as an infinite update loop.
pub const MAX_UPDATE_COUNT: usize = 100;

/// Engine configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Suppress log output for errors and warnings that have no handler.
    pub silent: bool,

    /// Batch watcher re-runs onto the next tick. When disabled, a queued
    /// watcher flushes immediately and deps notify in id order.
    #[serde(rename = "async")]
    pub async_flush: bool,

    /// Re-run threshold for the infinite loop breaker.
    pub max_update_count: usize,

    /// Receives errors from watcher getters, callbacks and the scheduler.
    #[serde(skip)]
    pub error_handler: Option<ErrorHandler>,

    /// Receives warnings about misuse (invalid paths, frozen targets, ...).
    #[serde(skip)]
    pub warn_handler: Option<WarnHandler>,
}

impl Config {
    /// Parse the serializable part of a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Install an error handler.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReactiveError, &str) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Install a warning handler.
    pub fn with_warn_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.warn_handler = Some(Arc::new(handler));
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            async_flush: true,
            max_update_count: MAX_UPDATE_COUNT,
            error_handler: None,
            warn_handler: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("silent", &self.silent)
            .field("async_flush", &self.async_flush)
            .field("max_update_count", &self.max_update_count)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .finish()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Get a copy of the current configuration.
pub fn get() -> Config {
    CONFIG.with(|config| config.borrow().clone())
}

/// Replace the current configuration.
pub fn set(config: Config) {
    CONFIG.with(|current| *current.borrow_mut() = config);
}

/// Modify the current configuration in place.
pub fn update<F>(f: F)
where
    F: FnOnce(&mut Config),
{
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

/// Restore the default configuration.
pub fn reset() {
    set(Config::default());
}

/// Read a single field without cloning the handlers.
pub(crate) fn read<R>(f: impl FnOnce(&Config) -> R) -> R {
    CONFIG.with(|config| f(&config.borrow()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_batch_updates() {
        let config = Config::default();
        assert!(config.async_flush);
        assert!(!config.silent);
        assert_eq!(config.max_update_count, MAX_UPDATE_COUNT);
    }

    #[test]
    fn parses_json_with_defaults() {
        let config = Config::from_json(r#"{ "async": false, "max_update_count": 5 }"#).unwrap();
        assert!(!config.async_flush);
        assert_eq!(config.max_update_count, 5);
        assert!(!config.silent);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = Config::from_json("{ async: }").unwrap_err();
        assert!(matches!(err, ReactiveError::Config(_)));
    }

    #[test]
    fn update_and_reset() {
        update(|c| c.silent = true);
        assert!(get().silent);

        reset();
        assert!(!get().silent);
    }
}
