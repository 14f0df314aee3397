//! Errors and Reporting
//!
//! Failures inside user code never unwind through the engine. Watchers
//! created by users report their errors here and keep going; internal
//! watchers hand them back to the caller as [`ReactiveError`].
//!
//! Misuse of the API (writing to a frozen object, adding keys to root state,
//! watching a malformed path) is a warning, not an error: it goes through
//! [`warn`] and the operation becomes a no-op.

use thiserror::Error;

use crate::config;
use crate::reactive::WatcherId;

/// Error type returned by user computations and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A watch expression is not a simple dot-delimited path.
    #[error("failed watching path \"{path}\": only simple dot-delimited paths are accepted")]
    InvalidPath {
        /// The rejected expression.
        path: String,
    },

    /// The watcher's computation failed.
    #[error("error in getter for watcher \"{expression}\": {source}")]
    Getter {
        /// Expression of the failing watcher.
        expression: String,
        source: BoxError,
    },

    /// The watcher's change callback failed.
    #[error("error in callback for watcher \"{expression}\": {source}")]
    Callback {
        /// Expression of the failing watcher.
        expression: String,
        source: BoxError,
    },

    /// The callback of an `immediate` watch failed on its first call.
    #[error("error in callback for immediate watcher \"{expression}\": {source}")]
    ImmediateCallback {
        /// Expression of the failing watcher.
        expression: String,
        source: BoxError,
    },

    /// A watcher kept re-queuing itself during a single flush.
    #[error("you may have an infinite update loop {location} ({count} re-runs of watcher {watcher})")]
    InfiniteUpdateLoop {
        watcher: WatcherId,
        /// Human readable description of the watcher.
        location: String,
        count: usize,
    },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Build a user-level error from a message.
    pub fn message(msg: impl Into<String>) -> BoxError {
        let msg: String = msg.into();
        msg.into()
    }
}

/// Report an error that was recovered from.
///
/// Calls the configured error handler, or logs it unless the engine is
/// silenced.
pub fn handle_error(err: &ReactiveError, info: &str) {
    let (handler, silent) = config::read(|c| (c.error_handler.clone(), c.silent));
    match handler {
        Some(handler) => handler(err, info),
        None if !silent => tracing::error!(error = %err, info, "reactive error"),
        None => {}
    }
}

/// Report a warning about API misuse.
pub fn warn(msg: &str) {
    let (handler, silent) = config::read(|c| (c.warn_handler.clone(), c.silent));
    match handler {
        Some(handler) => handler(msg),
        None if !silent => tracing::warn!("{}", msg),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn handler_receives_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        config::set(Config::default().with_error_handler(move |err, info| {
            sink.lock().push(format!("{info}: {err}"));
        }));

        let err = ReactiveError::InvalidPath { path: "a-b".into() };
        handle_error(&err, "watch");

        assert_eq!(seen.lock().len(), 1);
        assert!(seen.lock()[0].starts_with("watch: failed watching path \"a-b\""));
        config::reset();
    }

    #[test]
    fn handler_receives_warnings() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        config::set(Config::default().with_warn_handler(move |msg| {
            sink.lock().push(msg.to_string());
        }));

        warn("careful");
        assert_eq!(*seen.lock(), vec!["careful".to_string()]);
        config::reset();
    }

    #[test]
    fn getter_error_keeps_source() {
        use std::error::Error as _;

        let err = ReactiveError::Getter {
            expression: "state.a".into(),
            source: ReactiveError::message("boom"),
        };
        assert_eq!(err.to_string(), "error in getter for watcher \"state.a\": boom");
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
    }
}
