//! Watcher Queue
//!
//! Watchers that are neither lazy nor sync are batched here and re-run
//! together on the next tick. Within one batch:
//!
//! 1. A watcher is queued at most once, however many of its deps changed.
//! 2. The queue runs in ascending id order, so a watcher created earlier
//!    (a parent, or a user watcher declared before the render) runs first.
//! 3. A watcher queued while the flush is running is merged into the
//!    remaining part of the queue at its id position, but never before the
//!    watcher currently running.
//!
//! A watcher that keeps re-queuing itself is cut off after
//! `max_update_count` re-runs and reported as an infinite update loop.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::mem;

use crate::config;
use crate::error::{self, ReactiveError};
use crate::reactive::{Hook, Watcher, WatcherId};

use super::tick;

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,

    /// Ids currently in the queue and not yet run.
    has: HashSet<WatcherId>,

    /// Re-runs per watcher in the current flush.
    circular: HashMap<WatcherId, usize>,

    /// Watchers cut off by the loop breaker until the flush ends.
    suppressed: HashSet<WatcherId>,

    /// A flush has been requested and has not finished yet.
    waiting: bool,
    flushing: bool,

    /// Position of the watcher currently running.
    index: usize,

    after_flush: Vec<Hook>,
}

fn with_state<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    SCHEDULER.with(|state| f(&mut state.borrow_mut()))
}

/// Queue a watcher for the next flush.
///
/// Duplicates within a batch are dropped. The first watcher of a batch
/// requests a flush: on the next tick, or right away when the
/// configuration disables asynchronous flushing.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();
    let request_flush = with_state(|state| {
        if state.has.contains(&id) || state.suppressed.contains(&id) {
            return false;
        }
        state.has.insert(id);

        if state.flushing {
            let mut slot = state.queue.len();
            while slot > state.index + 1 && state.queue[slot - 1].id() > id {
                slot -= 1;
            }
            state.queue.insert(slot, watcher);
        } else {
            state.queue.push(watcher);
        }

        if state.waiting {
            return false;
        }
        state.waiting = true;
        true
    });

    if request_flush {
        if config::read(|c| c.async_flush) {
            tick::next_tick(flush);
        } else {
            flush();
        }
    }
}

/// Register a hook to run once, after the next flush completes.
pub fn after_flush<F>(hook: F)
where
    F: Fn() + Send + Sync + 'static,
{
    with_state(|state| state.after_flush.push(std::sync::Arc::new(hook)));
}

/// Whether a flush is currently running.
pub fn is_flushing() -> bool {
    with_state(|state| state.flushing)
}

/// Number of watchers waiting to run.
pub fn pending() -> usize {
    with_state(|state| state.has.len())
}

/// Drop every queued watcher and pending hook.
///
/// A flush that was already requested still runs, but finds nothing to do.
pub fn reset() {
    with_state(|state| *state = SchedulerState::default());
}

/// Guard that ends the flush when dropped, so a panicking watcher does not
/// leave the scheduler stuck in the flushing state.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        with_state(|state| {
            state.queue.clear();
            state.has.clear();
            state.circular.clear();
            state.suppressed.clear();
            state.waiting = false;
            state.flushing = false;
            state.index = 0;
        });
    }
}

/// Run every queued watcher.
pub(crate) fn flush() {
    let span = tracing::debug_span!("flush");
    let _enter = span.enter();

    let max_update_count = config::read(|c| c.max_update_count);
    let guard = FlushGuard;
    with_state(|state| {
        state.flushing = true;
        state.index = 0;
        state.queue.sort_by_key(Watcher::id);
    });

    loop {
        let next = with_state(|state| state.queue.get(state.index).cloned());
        let Some(watcher) = next else {
            break;
        };
        run_one(&watcher, max_update_count);
        with_state(|state| state.index += 1);
    }

    let (ran, hooks) = with_state(|state| {
        (
            mem::take(&mut state.queue),
            mem::take(&mut state.after_flush),
        )
    });
    // Hooks below may queue the next batch
    drop(guard);
    tracing::debug!(watchers = ran.len(), "flushed");

    // Children were created after their parents, so reverse order reports
    // them first
    for watcher in ran.iter().rev() {
        if let Some(scope) = watcher.scope() {
            scope.call_updated_hooks(watcher);
        }
    }
    for hook in hooks {
        hook();
    }
}

fn run_one(watcher: &Watcher, max_update_count: usize) {
    let id = watcher.id();
    if with_state(|state| state.suppressed.contains(&id)) {
        return;
    }

    if let Some(before) = watcher.before() {
        before();
    }
    with_state(|state| state.has.remove(&id));

    tracing::trace!(watcher = %id, "running watcher");
    if let Err(err) = watcher.run() {
        error::handle_error(&err, "scheduler flush");
    }

    // Queued again by its own run
    let count = with_state(|state| {
        if !state.has.contains(&id) {
            return None;
        }
        let count = state.circular.entry(id).or_default();
        *count += 1;
        Some(*count)
    });

    if let Some(count) = count.filter(|&count| count > max_update_count) {
        let location = if watcher.is_user() {
            format!("in watcher with expression \"{}\"", watcher.expression())
        } else {
            "in a scope's primary watcher".to_string()
        };
        error::handle_error(
            &ReactiveError::InfiniteUpdateLoop {
                watcher: id,
                location,
                count,
            },
            "scheduler flush",
        );
        with_state(|state| {
            state.suppressed.insert(id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::observer::{observe, ReactiveObject, Value};
    use crate::reactive::{callback, Expression, WatcherOptions};
    use crate::scheduler::drain_ticks;
    use crate::scope::Scope;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn state(value: serde_json::Value) -> ReactiveObject {
        let value = Value::from(value);
        observe(&value, false);
        value.as_object().cloned().unwrap()
    }

    fn recording_watcher(
        scope: &Scope,
        obj: &ReactiveObject,
        key: &'static str,
        label: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Watcher {
        let reader = obj.clone();
        let sink = log.clone();
        Watcher::new(
            scope,
            Expression::func(move || Ok(reader.get(key))),
            Some(callback(move |_, _| {
                sink.lock().push(label);
                Ok(())
            })),
            WatcherOptions::default(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn batches_until_the_tick_runs() {
        let scope = Scope::new();
        let obj = state(json!({ "a": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));
        recording_watcher(&scope, &obj, "a", "w", &log);

        obj.set("a", 2);
        obj.set("a", 3);
        assert_eq!(pending(), 1);
        assert!(log.lock().is_empty());

        drain_ticks();
        assert_eq!(*log.lock(), vec!["w"]);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn runs_in_creation_order() {
        let scope = Scope::new();
        let obj = state(json!({ "a": 1, "b": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));
        recording_watcher(&scope, &obj, "a", "first", &log);
        recording_watcher(&scope, &obj, "b", "second", &log);

        obj.set("b", 2);
        obj.set("a", 2);
        drain_ticks();

        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn watcher_queued_mid_flush_runs_in_same_flush() {
        let scope = Scope::new();
        let obj = state(json!({ "a": 1, "b": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));

        // The earlier watcher writes what the later one reads
        let writer = obj.clone();
        let sink = log.clone();
        let reader = obj.clone();
        Watcher::new(
            &scope,
            Expression::func(move || Ok(reader.get("a"))),
            Some(callback(move |new, _| {
                sink.lock().push("first");
                writer.set("b", new.clone());
                Ok(())
            })),
            WatcherOptions::default(),
            false,
        )
        .unwrap();
        recording_watcher(&scope, &obj, "b", "second", &log);

        obj.set("a", 5);
        let rounds = drain_ticks();

        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(rounds, 1);
    }

    #[test]
    fn earlier_watcher_queued_after_its_slot_runs_next() {
        let scope = Scope::new();
        let obj = state(json!({ "a": 1, "x": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));

        // Lowest id, but only queued by the writer below
        recording_watcher(&scope, &obj, "x", "early", &log);

        let writer = obj.clone();
        let sink = log.clone();
        let reader = obj.clone();
        Watcher::new(
            &scope,
            Expression::func(move || Ok(reader.get("a"))),
            Some(callback(move |new, _| {
                sink.lock().push("writer");
                writer.set("x", new.clone());
                Ok(())
            })),
            WatcherOptions::default(),
            false,
        )
        .unwrap();
        recording_watcher(&scope, &obj, "a", "late", &log);

        obj.set("a", 5);
        let rounds = drain_ticks();

        assert_eq!(*log.lock(), vec!["writer", "early", "late"]);
        assert_eq!(rounds, 1);
    }

    #[test]
    fn panicking_watcher_does_not_stall_the_queue() {
        let scope = Scope::new();
        let obj = state(json!({ "a": 1, "b": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));

        let reader = obj.clone();
        Watcher::new(
            &scope,
            Expression::func(move || Ok(reader.get("a"))),
            Some(callback(|_, _| panic!("callback failed"))),
            WatcherOptions::default(),
            false,
        )
        .unwrap();
        recording_watcher(&scope, &obj, "b", "w", &log);

        obj.set("a", 2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(drain_ticks));
        assert!(result.is_err());
        assert!(!is_flushing());
        assert_eq!(pending(), 0);

        obj.set("b", 2);
        drain_ticks();
        assert_eq!(*log.lock(), vec!["w"]);
    }

    #[test]
    fn self_triggering_watcher_is_cut_off() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        config::set(
            Config {
                max_update_count: 10,
                ..Config::default()
            }
            .with_error_handler(move |err, _| sink.lock().push(err.to_string())),
        );

        let scope = Scope::new();
        let obj = state(json!({ "n": 0 }));
        let reader = obj.clone();
        let writer = obj.clone();
        Watcher::new(
            &scope,
            Expression::func(move || Ok(reader.get("n"))),
            Some(callback(move |new, _| {
                writer.set("n", new.as_number().unwrap_or(0.0) + 1.0);
                Ok(())
            })),
            WatcherOptions::default().user(),
            false,
        )
        .unwrap();

        obj.set("n", 1);
        drain_ticks();

        let reported = reported.lock();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("infinite update loop"));
        assert!(!is_flushing());
        config::reset();
    }

    #[test]
    fn synchronous_mode_flushes_inside_the_write() {
        config::update(|c| c.async_flush = false);
        let scope = Scope::new();
        let obj = state(json!({ "a": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));
        recording_watcher(&scope, &obj, "a", "w", &log);

        obj.set("a", 2);
        assert_eq!(*log.lock(), vec!["w"]);
        assert_eq!(drain_ticks(), 0);
        config::reset();
    }

    #[test]
    fn after_flush_hooks_run_once_in_order() {
        let scope = Scope::new();
        let obj = state(json!({ "a": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));
        recording_watcher(&scope, &obj, "a", "w", &log);

        let first = log.clone();
        after_flush(move || first.lock().push("hook 1"));
        let second = log.clone();
        after_flush(move || second.lock().push("hook 2"));

        obj.set("a", 2);
        drain_ticks();
        obj.set("a", 3);
        drain_ticks();

        assert_eq!(*log.lock(), vec!["w", "hook 1", "hook 2", "w"]);
    }

    #[test]
    fn reset_discards_queue() {
        let scope = Scope::new();
        let obj = state(json!({ "a": 1 }));
        let log = Arc::new(Mutex::new(Vec::new()));
        recording_watcher(&scope, &obj, "a", "w", &log);

        obj.set("a", 2);
        reset();
        drain_ticks();
        assert!(log.lock().is_empty());

        obj.set("a", 3);
        drain_ticks();
        assert_eq!(*log.lock(), vec!["w"]);
    }
}
