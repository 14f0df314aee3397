//! Dependency Tracking
//!
//! This module implements the tracking half of the engine: deps, watchers,
//! and the context that connects them.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A [`Dep`] belongs to one reactive property or one observed container. It
//! holds the watchers currently depending on that piece of state and
//! notifies them when it changes.
//!
//! ## Watchers
//!
//! A [`Watcher`] wraps a computation. While the computation runs, the
//! watcher is the current target of the [`ReactiveContext`], and every dep
//! that is read registers itself with it. When a dep notifies, the watcher
//! re-runs (now, on the next flush, or on next read when lazy) and refreshes
//! its dependency set, dropping edges it no longer needs.
//!
//! ## Deep traversal
//!
//! [`traverse`] reads an entire value graph so a deep watcher depends on
//! every nested property, not only on what its computation touched.

mod context;
mod dep;
mod id;
pub mod path;
mod traverse;
mod watcher;

pub use context::{untracked, ReactiveContext};
pub use dep::Dep;
pub use id::{DepId, WatcherId};
pub use traverse::traverse;
pub use watcher::{
    callback, Computation, Expression, Hook, WatchCallback, Watcher, WatcherOptions,
};
