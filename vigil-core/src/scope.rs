//! Scopes
//!
//! A [`Scope`] owns a group of watchers and, optionally, the root data they
//! watch. It plays the part a component instance plays in a UI layer:
//!
//! - [`watch`](Scope::watch) creates user watchers over paths or closures;
//! - [`primary`](Scope::primary) installs the one internal watcher that
//!   re-renders the scope, with [`on_updated`](Scope::on_updated) hooks
//!   called after it re-runs in a flush;
//! - [`computed`](Scope::computed) creates cached, lazily evaluated values;
//! - [`destroy`](Scope::destroy) tears all of it down.
//!
//! ```rust,ignore
//! let scope = Scope::with_data(Value::from(json!({ "count": 1 })));
//! scope.watch("count", |new, old| {
//!     println!("{old} -> {new}");
//!     Ok(())
//! }, WatchOptions::default())?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{self, BoxError, ReactiveError};
use crate::observer::{observe, Observer, Value};
use crate::reactive::{
    untracked, Expression, Hook, ReactiveContext, Watcher, WatcherId, WatcherOptions,
};

/// Options for [`Scope::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Fire on nested mutations too.
    pub deep: bool,

    /// Fire inside the write instead of on the next flush.
    pub sync: bool,

    /// Fire once right away with the initial value.
    pub immediate: bool,
}

impl WatchOptions {
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Owner of a group of watchers. Cloning yields another handle to the same
/// scope.
#[derive(Clone)]
pub struct Scope(Arc<ScopeInner>);

pub(crate) struct ScopeInner {
    data: Value,

    /// Observer of `data` when it was bound as root data.
    root: Option<Arc<Observer>>,

    primary: Mutex<Option<Watcher>>,
    watchers: Mutex<Vec<Watcher>>,
    computed: Mutex<IndexMap<String, Computed>>,
    updated_hooks: Mutex<Vec<Hook>>,
    being_destroyed: AtomicBool,
    destroyed: AtomicBool,
}

impl ScopeInner {
    pub(crate) fn is_being_destroyed(&self) -> bool {
        self.being_destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn remove_watcher(&self, id: WatcherId) {
        self.watchers.lock().retain(|w| w.id() != id);
    }
}

impl Scope {
    /// A scope without data. Path expressions resolve against `Null`.
    pub fn new() -> Self {
        Self::build(Value::Null, None)
    }

    /// A scope bound to `data`. The data is observed as root data: adding or
    /// deleting its top-level keys through
    /// [`set`](crate::observer::set)/[`del`](crate::observer::del) is
    /// refused.
    pub fn with_data(data: Value) -> Self {
        if !matches!(data, Value::Object(_)) {
            error::warn("Scope data should be an object");
        }
        let root = observe(&data, true);
        Self::build(data, root)
    }

    fn build(data: Value, root: Option<Arc<Observer>>) -> Self {
        Self(Arc::new(ScopeInner {
            data,
            root,
            primary: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
            computed: Mutex::new(IndexMap::new()),
            updated_hooks: Mutex::new(Vec::new()),
            being_destroyed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Arc::downgrade(&self.0)
    }

    /// The root data.
    pub fn data(&self) -> Value {
        self.0.data.clone()
    }

    /// Watch a path or closure.
    ///
    /// The watcher is a user watcher: errors in the expression or callback
    /// are reported through the configured error handler. With `immediate`,
    /// the callback is invoked once right away with `(value, Null)`, without
    /// collecting dependencies.
    pub fn watch<F>(
        &self,
        expression: impl Into<Expression>,
        callback: F,
        options: WatchOptions,
    ) -> Result<Watcher, ReactiveError>
    where
        F: Fn(&Value, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let callback = crate::reactive::callback(callback);
        let mut watcher_options = WatcherOptions::default().user();
        watcher_options.deep = options.deep;
        watcher_options.sync = options.sync;

        let watcher = Watcher::new(
            self,
            expression.into(),
            Some(callback.clone()),
            watcher_options,
            false,
        )?;

        if options.immediate {
            let value = watcher.value();
            if let Err(source) = untracked(|| callback(&value, &Value::Null)) {
                let err = ReactiveError::ImmediateCallback {
                    expression: watcher.expression().to_string(),
                    source,
                };
                error::handle_error(&err, "immediate watcher");
            }
        }
        Ok(watcher)
    }

    /// Install the scope's primary watcher.
    ///
    /// `before` runs right before every re-run the scheduler performs. A
    /// failure of the first run is returned.
    pub fn primary<F>(&self, computation: F, before: Option<Hook>) -> Result<Watcher, ReactiveError>
    where
        F: Fn() -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let options = WatcherOptions {
            before,
            ..WatcherOptions::default()
        };
        Watcher::new(self, Expression::func(computation), None, options, true)
    }

    /// Define a computed value.
    ///
    /// The computation runs on first read and then only after one of its
    /// dependencies changed. Redefining a name replaces the previous
    /// definition.
    pub fn computed<F>(&self, name: &str, computation: F) -> Result<Computed, ReactiveError>
    where
        F: Fn() -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let watcher = Watcher::new(
            self,
            Expression::func(computation),
            None,
            WatcherOptions::default().lazy(),
            false,
        )?;
        let computed = Computed { watcher };
        let previous = self
            .0
            .computed
            .lock()
            .insert(name.to_string(), computed.clone());
        if let Some(previous) = previous {
            previous.watcher.teardown();
        }
        Ok(computed)
    }

    /// Read a computed value by name. Unknown names warn and yield `Null`.
    pub fn computed_value(&self, name: &str) -> Result<Value, ReactiveError> {
        let computed = self.0.computed.lock().get(name).cloned();
        match computed {
            Some(computed) => computed.get(),
            None => {
                error::warn(&format!("Computed property \"{name}\" is not defined"));
                Ok(Value::Null)
            }
        }
    }

    /// Register a hook called after the primary watcher re-ran in a flush.
    pub fn on_updated<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.0.updated_hooks.lock().push(Arc::new(hook));
    }

    pub(crate) fn call_updated_hooks(&self, watcher: &Watcher) {
        let is_primary = self
            .0
            .primary
            .lock()
            .as_ref()
            .is_some_and(|primary| primary.ptr_eq(watcher));
        if !is_primary || self.is_destroyed() || !watcher.is_active() {
            return;
        }

        let hooks = self.0.updated_hooks.lock().clone();
        for hook in hooks {
            hook();
        }
    }

    pub(crate) fn set_primary(&self, watcher: Watcher) {
        *self.0.primary.lock() = Some(watcher);
    }

    pub(crate) fn clear_primary(&self, watcher: &Watcher) {
        let mut primary = self.0.primary.lock();
        if primary.as_ref().is_some_and(|current| current.ptr_eq(watcher)) {
            *primary = None;
        }
    }

    pub(crate) fn add_watcher(&self, watcher: Watcher) {
        self.0.watchers.lock().push(watcher);
    }

    /// The primary watcher, if installed.
    pub fn primary_watcher(&self) -> Option<Watcher> {
        self.0.primary.lock().clone()
    }

    /// Watchers owned by the scope, in creation order.
    pub fn watchers(&self) -> Vec<Watcher> {
        self.0.watchers.lock().clone()
    }

    pub fn watcher_count(&self) -> usize {
        self.0.watchers.lock().len()
    }

    /// Tear down every watcher and release the root data. Idempotent.
    pub fn destroy(&self) {
        if self.0.being_destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let primary = self.0.primary.lock().take();
        if let Some(primary) = primary {
            primary.teardown();
        }
        let watchers = std::mem::take(&mut *self.0.watchers.lock());
        for watcher in &watchers {
            watcher.teardown();
        }
        self.0.computed.lock().clear();

        if let Some(root) = &self.0.root {
            root.release_root();
        }
        self.0.destroyed.store(true, Ordering::SeqCst);
        tracing::trace!(watchers = watchers.len(), "scope destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.load(Ordering::SeqCst)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("watchers", &self.watcher_count())
            .field("has_primary", &self.0.primary.lock().is_some())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// A cached value derived from reactive state.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Current value, re-evaluated only if a dependency changed.
    ///
    /// Inside another watcher, that watcher also subscribes to everything
    /// the computed value depends on.
    pub fn get(&self) -> Result<Value, ReactiveError> {
        if self.watcher.is_dirty() {
            self.watcher.evaluate()?;
        }
        if ReactiveContext::is_active() {
            self.watcher.depend();
        }
        Ok(self.watcher.value())
    }

    /// The lazy watcher behind this value.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("watcher", &self.watcher.id())
            .field("dirty", &self.watcher.is_dirty())
            .finish()
    }
}
