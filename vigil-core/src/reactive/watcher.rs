//! Watcher Implementation
//!
//! A Watcher is a tracked computation. It evaluates its computation with
//! itself as the current target, so every reactive property read during the
//! evaluation subscribes it. When one of those properties changes the
//! watcher updates according to its mode:
//!
//! - **lazy**: only marks itself dirty; the value is recomputed on the next
//!   [`Watcher::evaluate`] (computed values).
//! - **sync**: re-runs immediately inside the write.
//! - default: queued on the scheduler and re-run once on the next flush.
//!
//! # Dependency bookkeeping
//!
//! Each watcher keeps two dep sets: the deps of the last completed run and
//! the deps collected by the run in progress. After every run the sets are
//! reconciled. Deps that were not read again lose this subscriber; deps read
//! again keep their subscription without being re-subscribed.
//!
//! # Errors
//!
//! Watchers created by users (`user` option) never propagate errors from
//! their computation or callback; they report them and keep their last
//! value. Internal watchers (render, computed) return the error to the
//! caller since a failure there is a bug in the consuming layer.

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::dep::Dep;
use super::id::{DepId, WatcherId};
use super::path;
use super::traverse::traverse;
use crate::error::{self, BoxError, ReactiveError};
use crate::observer::Value;
use crate::scheduler;
use crate::scope::{Scope, ScopeInner};

/// A watcher's computation.
pub type Computation = Arc<dyn Fn() -> Result<Value, BoxError> + Send + Sync>;

/// Change callback, called with `(new_value, old_value)`.
pub type WatchCallback = Arc<dyn Fn(&Value, &Value) -> Result<(), BoxError> + Send + Sync>;

/// Argument-less hook.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as a [`WatchCallback`].
pub fn callback<F>(f: F) -> WatchCallback
where
    F: Fn(&Value, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a watcher evaluates.
#[derive(Clone)]
pub enum Expression {
    /// An arbitrary computation.
    Func(Computation),

    /// A dot-delimited path resolved against the scope's data, such as
    /// `"user.address.city"`.
    Path(String),
}

impl Expression {
    /// Create an expression from a closure.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn() -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    /// Create a path expression.
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    fn describe(&self) -> String {
        match self {
            Self::Func(_) => "<function>".to_string(),
            Self::Path(path) => path.clone(),
        }
    }
}

impl From<&str> for Expression {
    fn from(path: &str) -> Self {
        Self::path(path)
    }
}

impl From<String> for Expression {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

/// Watcher mode flags.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Depend on everything reachable from the value, not just what the
    /// computation read.
    pub deep: bool,

    /// The watcher was created by user code; its errors are reported rather
    /// than returned.
    pub user: bool,

    /// Compute only on demand, tracking staleness with a dirty flag.
    pub lazy: bool,

    /// Re-run inside the triggering write instead of on the next flush.
    pub sync: bool,

    /// Called by the scheduler right before the watcher re-runs.
    pub before: Option<Hook>,
}

impl WatcherOptions {
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn user(mut self) -> Self {
        self.user = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }
}

/// A tracked computation.
///
/// Cloning a watcher yields another handle to the same watcher.
#[derive(Clone)]
pub struct Watcher(Arc<WatcherInner>);

pub(crate) struct WatcherInner {
    id: WatcherId,
    scope: Weak<ScopeInner>,
    expression: String,
    getter: Computation,
    callback: Option<WatchCallback>,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    before: Option<Hook>,
    state: Mutex<WatcherState>,
}

struct WatcherState {
    active: bool,
    dirty: bool,
    value: Value,

    /// Deps of the last completed run.
    deps: IndexMap<DepId, Dep>,

    /// Deps collected by the run in progress.
    new_deps: IndexMap<DepId, Dep>,
}

impl Watcher {
    /// Create a watcher owned by `scope`.
    ///
    /// Unless the watcher is lazy, its computation runs once right away to
    /// collect the initial dependencies and value. An internal watcher whose
    /// first run fails returns the error.
    ///
    /// `is_primary` registers the watcher as the scope's primary (render)
    /// watcher.
    pub fn new(
        scope: &Scope,
        expression: Expression,
        callback: Option<WatchCallback>,
        options: WatcherOptions,
        is_primary: bool,
    ) -> Result<Self, ReactiveError> {
        let description = expression.describe();
        let getter = match expression {
            Expression::Func(f) => f,
            Expression::Path(raw) => match path::parse_path(&raw) {
                Some(segments) => {
                    let root = scope.data();
                    let getter: Computation = Arc::new(move || Ok(path::resolve(&root, &segments)));
                    getter
                }
                None => {
                    let err = ReactiveError::InvalidPath { path: raw };
                    error::warn(&format!("{err}; use a function instead"));
                    let noop: Computation = Arc::new(|| Ok(Value::Null));
                    noop
                }
            },
        };

        let watcher = Self(Arc::new(WatcherInner {
            id: WatcherId::next(),
            scope: scope.downgrade(),
            expression: description,
            getter,
            callback,
            deep: options.deep,
            user: options.user,
            lazy: options.lazy,
            sync: options.sync,
            before: options.before,
            state: Mutex::new(WatcherState {
                active: true,
                dirty: options.lazy,
                value: Value::Null,
                deps: IndexMap::new(),
                new_deps: IndexMap::new(),
            }),
        }));

        if is_primary {
            scope.set_primary(watcher.clone());
        }
        scope.add_watcher(watcher.clone());

        if !watcher.0.lazy {
            match watcher.get() {
                Ok(value) => watcher.0.state.lock().value = value,
                Err(err) => {
                    // The caller never gets a handle, so nothing else could
                    // tear it down
                    watcher.teardown();
                    if is_primary {
                        scope.clear_primary(&watcher);
                    }
                    return Err(err);
                }
            }
        }

        tracing::trace!(watcher = %watcher.id(), expression = %watcher.0.expression, "watcher created");
        Ok(watcher)
    }

    pub(crate) fn from_inner(inner: Arc<WatcherInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Arc::downgrade(&self.0)
    }

    /// Get the watcher's unique ID.
    pub fn id(&self) -> WatcherId {
        self.0.id
    }

    /// Human readable form of the watched expression.
    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    /// Evaluate the computation and re-collect dependencies.
    ///
    /// Errors of user watchers are reported and yield `Value::Null`; errors
    /// of internal watchers are returned. Either way the target stack is
    /// restored and the dependency sets reconciled.
    pub fn get(&self) -> Result<Value, ReactiveError> {
        let ctx = ReactiveContext::enter(Some(self.clone()));

        let result = match (self.0.getter)() {
            Ok(value) => {
                // Touch every nested property so they are all tracked
                if self.0.deep {
                    traverse(&value);
                }
                Ok(value)
            }
            Err(source) => {
                let err = ReactiveError::Getter {
                    expression: self.0.expression.clone(),
                    source,
                };
                if self.0.user {
                    error::handle_error(&err, "getter");
                    Ok(Value::Null)
                } else {
                    Err(err)
                }
            }
        };

        drop(ctx);
        self.cleanup_deps();
        result
    }

    /// Record `dep` as a dependency of the run in progress.
    ///
    /// Subscribes to the dep only if the previous run did not already
    /// depend on it.
    pub fn add_dep(&self, dep: &Dep) {
        let subscribe = {
            let mut state = self.0.state.lock();
            let id = dep.id();
            if state.new_deps.contains_key(&id) {
                false
            } else {
                state.new_deps.insert(id, dep.clone());
                !state.deps.contains_key(&id)
            }
        };

        if subscribe {
            dep.add_subscriber(self);
        }
    }

    /// Drop subscriptions that the last run no longer needed and make its
    /// deps the new baseline.
    fn cleanup_deps(&self) {
        let stale: Vec<Dep> = {
            let mut state = self.0.state.lock();
            let stale = state
                .deps
                .iter()
                .filter(|(id, _)| !state.new_deps.contains_key(*id))
                .map(|(_, dep)| dep.clone())
                .collect();
            state.deps = mem::take(&mut state.new_deps);
            stale
        };

        for dep in stale {
            dep.remove_subscriber(self);
        }
    }

    /// Called by a dep when one of the watcher's dependencies changed.
    pub fn update(&self) {
        if self.0.lazy {
            self.0.state.lock().dirty = true;
        } else if self.0.sync {
            if let Err(err) = self.run() {
                error::handle_error(&err, "sync watcher");
            }
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Re-evaluate and fire the callback if the value changed.
    ///
    /// Object and array values always fire, since they may have been
    /// mutated in place; so do deep watchers. No-op once torn down.
    pub fn run(&self) -> Result<(), ReactiveError> {
        if !self.is_active() {
            return Ok(());
        }

        let value = self.get()?;
        let old_value = {
            let mut state = self.0.state.lock();
            if value == state.value && !value.is_container() && !self.0.deep {
                return Ok(());
            }
            mem::replace(&mut state.value, value.clone())
        };

        let Some(callback) = &self.0.callback else {
            return Ok(());
        };
        if let Err(source) = callback(&value, &old_value) {
            let err = ReactiveError::Callback {
                expression: self.0.expression.clone(),
                source,
            };
            if !self.0.user {
                return Err(err);
            }
            error::handle_error(&err, "callback");
        }
        Ok(())
    }

    /// Recompute a lazy watcher's value and mark it clean.
    pub fn evaluate(&self) -> Result<(), ReactiveError> {
        let value = self.get()?;
        let mut state = self.0.state.lock();
        state.value = value;
        state.dirty = false;
        Ok(())
    }

    /// Make the current target depend on everything this watcher depends
    /// on.
    pub fn depend(&self) {
        let deps: Vec<Dep> = self.0.state.lock().deps.values().cloned().collect();
        for dep in deps.iter().rev() {
            dep.depend();
        }
    }

    /// Unsubscribe from every dep and deactivate. Idempotent.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.0.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            state.deps.values().cloned().collect::<Vec<_>>()
        };

        // Removal from the scope's list is skipped while the whole scope is
        // being destroyed.
        if let Some(scope) = self.0.scope.upgrade() {
            if !scope.is_being_destroyed() {
                scope.remove_watcher(self.id());
            }
        }

        for dep in deps.iter().rev() {
            dep.remove_subscriber(self);
        }

        tracing::trace!(watcher = %self.id(), "watcher torn down");
    }

    /// The last computed value.
    pub fn value(&self) -> Value {
        self.0.state.lock().value.clone()
    }

    /// Whether the watcher still reacts to changes.
    pub fn is_active(&self) -> bool {
        self.0.state.lock().active
    }

    /// Whether a lazy watcher's value is stale.
    pub fn is_dirty(&self) -> bool {
        self.0.state.lock().dirty
    }

    pub fn is_lazy(&self) -> bool {
        self.0.lazy
    }

    pub fn is_sync(&self) -> bool {
        self.0.sync
    }

    pub fn is_deep(&self) -> bool {
        self.0.deep
    }

    pub fn is_user(&self) -> bool {
        self.0.user
    }

    /// The scheduler's pre-run hook.
    pub fn before(&self) -> Option<Hook> {
        self.0.before.clone()
    }

    /// The owning scope, if it is still alive.
    pub fn scope(&self) -> Option<Scope> {
        self.0.scope.upgrade().map(Scope::from_inner)
    }

    /// Deps of the last completed run.
    pub fn deps(&self) -> Vec<Dep> {
        self.0.state.lock().deps.values().cloned().collect()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.0.state.lock().deps.len()
    }

    /// Check whether two handles refer to the same watcher.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("active", &state.active)
            .field("dirty", &state.dirty)
            .field("dependency_count", &state.deps.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
