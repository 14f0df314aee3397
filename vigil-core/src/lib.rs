//! Vigil Core
//!
//! This crate provides the reactivity engine for the Vigil runtime. It
//! implements:
//!
//! - Observable state: objects and arrays whose reads are tracked and whose
//!   writes notify
//! - Watchers: computations that re-run when the state they read changes
//! - A batching scheduler that re-runs watchers once per tick, in creation
//!   order, with a guard against infinite update loops
//! - Scopes that own watchers, computed values and root data
//!
//! # Architecture
//!
//! - `observer`: the [`Value`] graph and the machinery that makes it
//!   observable
//! - `reactive`: deps, watchers and the current-watcher context
//! - `scheduler`: the watcher queue and the tick queue that drives it
//! - `scope`: ownership and lifetime of groups of watchers
//! - `config` / `error`: per-thread configuration and error reporting
//!
//! All engine state (current watcher, queues, configuration) is per thread.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use vigil_core::{scheduler, Scope, Value, WatchOptions};
//!
//! let scope = Scope::with_data(Value::from(json!({ "count": 1 })));
//!
//! scope.watch("count", |new, old| {
//!     println!("count: {old} -> {new}");
//!     Ok(())
//! }, WatchOptions::default())?;
//!
//! let state = scope.data();
//! state.as_object().unwrap().set("count", 2);
//!
//! // Nothing has run yet; the watcher re-runs on the next tick
//! scheduler::drain_ticks();
//! // prints: "count: 1 -> 2"
//! ```

pub mod config;
pub mod error;
pub mod observer;
pub mod reactive;
pub mod scheduler;
pub mod scope;

pub use config::Config;
pub use error::{BoxError, ReactiveError};
pub use observer::{del, observe, set, ReactiveArray, ReactiveObject, Value};
pub use reactive::{Dep, Expression, Watcher, WatcherOptions};
pub use scope::{Computed, Scope, WatchOptions};
