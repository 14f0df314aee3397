//! Dep Implementation
//!
//! A Dep is the subscriber list of one reactive property or one observed
//! container. Reading the property calls [`Dep::depend`], which registers
//! the dep with the current watcher; writing it calls [`Dep::notify`], which
//! tells every subscribed watcher to update.
//!
//! # Ownership
//!
//! Watchers hold their deps strongly, deps hold their subscribers weakly.
//! A watcher that is dropped without being torn down simply stops receiving
//! notifications; its stale entry is pruned on the next subscription.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::id::{DepId, WatcherId};
use super::watcher::{Watcher, WatcherInner};
use crate::config;

/// A set of watchers depending on one piece of reactive state.
#[derive(Clone)]
pub struct Dep(Arc<DepInner>);

struct DepInner {
    id: DepId,

    /// Subscribers in subscription order. A watcher appears at most once.
    subs: Mutex<Vec<(WatcherId, Weak<WatcherInner>)>>,
}

impl Dep {
    /// Create a new dep with no subscribers.
    pub fn new() -> Self {
        Self(Arc::new(DepInner {
            id: DepId::next(),
            subs: Mutex::new(Vec::new()),
        }))
    }

    /// Get the dep's unique ID.
    pub fn id(&self) -> DepId {
        self.0.id
    }

    /// Subscribe a watcher. No-op if it is already subscribed.
    pub fn add_subscriber(&self, watcher: &Watcher) {
        let mut subs = self.0.subs.lock();
        subs.retain(|(_, weak)| weak.strong_count() > 0);
        if subs.iter().all(|(id, _)| *id != watcher.id()) {
            subs.push((watcher.id(), watcher.downgrade()));
        }
    }

    /// Unsubscribe a watcher. No-op if it is not subscribed.
    pub fn remove_subscriber(&self, watcher: &Watcher) {
        self.0.subs.lock().retain(|(id, _)| *id != watcher.id());
    }

    /// Register this dep with the current watcher, if there is one.
    ///
    /// The watcher decides whether the edge is new; see
    /// [`Watcher::add_dep`].
    pub fn depend(&self) {
        if let Some(target) = ReactiveContext::current() {
            target.add_dep(self);
        }
    }

    /// Tell every subscriber that the value behind this dep changed.
    ///
    /// Works on a snapshot: watchers subscribing or unsubscribing while the
    /// notification is in flight do not affect it.
    pub fn notify(&self) {
        let mut subs: SmallVec<[Watcher; 8]> = self
            .0
            .subs
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade().map(Watcher::from_inner))
            .collect();

        if !config::read(|c| c.async_flush) {
            // Without batching the scheduler never sorts, so keep the run
            // order deterministic here.
            subs.sort_by_key(Watcher::id);
        }

        for watcher in subs {
            watcher.update();
        }
    }

    /// Check whether a watcher is subscribed.
    pub fn has_subscriber(&self, watcher: &Watcher) -> bool {
        self.0.subs.lock().iter().any(|(id, _)| *id == watcher.id())
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.0
            .subs
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.0.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::observer::Value;
    use crate::reactive::{callback, Expression, WatcherOptions};
    use crate::scope::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_watcher(scope: &Scope, counter: Arc<AtomicUsize>) -> Watcher {
        Watcher::new(
            scope,
            Expression::func(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
            None,
            WatcherOptions::default().sync(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn subscribers_are_unique() {
        let scope = Scope::new();
        let watcher = counting_watcher(&scope, Arc::default());
        let dep = Dep::new();

        dep.add_subscriber(&watcher);
        dep.add_subscriber(&watcher);
        assert_eq!(dep.subscriber_count(), 1);

        dep.remove_subscriber(&watcher);
        assert_eq!(dep.subscriber_count(), 0);
        assert!(!dep.has_subscriber(&watcher));

        // Removing twice is harmless
        dep.remove_subscriber(&watcher);
    }

    #[test]
    fn notify_updates_subscribers() {
        let scope = Scope::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let watcher = counting_watcher(&scope, runs.clone());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let dep = Dep::new();
        dep.add_subscriber(&watcher);
        dep.notify();
        dep.notify();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn depend_without_target_is_noop() {
        let dep = Dep::new();
        dep.depend();
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn dropped_watchers_are_skipped() {
        let dep = Dep::new();
        {
            let scope = Scope::new();
            let watcher = counting_watcher(&scope, Arc::default());
            dep.add_subscriber(&watcher);
            assert_eq!(dep.subscriber_count(), 1);
        }
        assert_eq!(dep.subscriber_count(), 0);
        dep.notify();
    }

    #[test]
    fn sync_mode_notifies_in_id_order() {
        config::set(Config {
            async_flush: false,
            ..Config::default()
        });

        let scope = Scope::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |name: &'static str| {
            let order = order.clone();
            Watcher::new(
                &scope,
                Expression::func(|| Ok(Value::Null)),
                Some(callback(move |_, _| {
                    order.lock().push(name);
                    Ok(())
                })),
                WatcherOptions::default().deep(),
                false,
            )
            .unwrap()
        };
        let first = make("first");
        let second = make("second");

        let dep = Dep::new();
        dep.add_subscriber(&second);
        dep.add_subscriber(&first);
        dep.notify();

        assert_eq!(*order.lock(), vec!["first", "second"]);
        config::reset();
    }
}
