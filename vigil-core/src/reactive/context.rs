//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating. When a
//! reactive property is read, its dep asks this module for the current
//! watcher and registers itself with it.
//!
//! # Implementation
//!
//! A thread-local stack of targets. Entering a watcher's evaluation pushes
//! it; the returned guard pops it again, even if the computation panics.
//! Nested evaluations (a computed value read inside a render) suspend the
//! outer watcher for their duration and resume it when they pop.
//!
//! A `None` entry suspends tracking entirely; see [`untracked`].

use std::cell::RefCell;

use super::watcher::Watcher;
use super::WatcherId;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    target: Option<WatcherId>,
}

impl ReactiveContext {
    /// Make `target` the current watcher until the guard is dropped.
    ///
    /// Passing `None` disables dependency collection for the duration.
    pub fn enter(target: Option<Watcher>) -> Self {
        let id = target.as_ref().map(Watcher::id);
        TARGET_STACK.with(|stack| stack.borrow_mut().push(target));
        Self { target: id }
    }

    /// Check if a watcher is currently collecting dependencies.
    pub fn is_active() -> bool {
        TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// Get the current watcher, if any.
    pub fn current() -> Option<Watcher> {
        TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Number of entries on the stack.
    pub fn depth() -> usize {
        TARGET_STACK.with(|stack| stack.borrow().len())
    }

    /// Drop every entry from the stack.
    ///
    /// Only needed to recover from a computation that leaked a guard
    /// (`mem::forget`), or to isolate test cases.
    pub fn reset() {
        TARGET_STACK.with(|stack| stack.borrow_mut().clear());
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.as_ref().map(Watcher::id),
                    self.target,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

/// Run `f` without collecting dependencies for the current watcher.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter(None);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Value;
    use crate::reactive::{Expression, WatcherOptions};
    use crate::scope::Scope;

    fn lazy_watcher(scope: &Scope) -> Watcher {
        Watcher::new(
            scope,
            Expression::func(|| Ok(Value::Null)),
            None,
            WatcherOptions::default().lazy(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn context_tracks_target() {
        let scope = Scope::new();
        let watcher = lazy_watcher(&scope);

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current().is_none());

        {
            let _ctx = ReactiveContext::enter(Some(watcher.clone()));
            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(watcher.id()));
        }

        assert!(!ReactiveContext::is_active());
        assert_eq!(ReactiveContext::depth(), 0);
    }

    #[test]
    fn nested_contexts() {
        let scope = Scope::new();
        let outer = lazy_watcher(&scope);
        let inner = lazy_watcher(&scope);

        {
            let _outer = ReactiveContext::enter(Some(outer.clone()));
            {
                let _inner = ReactiveContext::enter(Some(inner.clone()));
                assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(inner.id()));
            }

            // After the inner context drops, the outer one is current again
            assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(outer.id()));
        }

        assert!(ReactiveContext::current().is_none());
    }

    #[test]
    fn untracked_suspends_target() {
        let scope = Scope::new();
        let watcher = lazy_watcher(&scope);

        let _ctx = ReactiveContext::enter(Some(watcher));
        untracked(|| {
            assert!(!ReactiveContext::is_active());
            assert_eq!(ReactiveContext::depth(), 2);
        });
        assert!(ReactiveContext::is_active());
    }
}
