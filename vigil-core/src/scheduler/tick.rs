//! Tick Queue
//!
//! Callbacks deferred with [`next_tick`] are collected into rounds. The
//! first callback of a round asks the installed [`TickDriver`] to run the
//! round later; everything deferred before it runs joins the same round.
//!
//! The default driver, [`ManualTick`], leaves running rounds to the host,
//! which calls [`drain_ticks`] at its own turn boundaries. With the `tokio`
//! feature, [`TokioTick`] runs each round as a local task.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

thread_local! {
    static TICKS: RefCell<TickState> = RefCell::new(TickState::default());
}

type TickCallback = Box<dyn FnOnce()>;

struct TickState {
    callbacks: Vec<TickCallback>,

    /// A round has been handed to the driver and has not run yet.
    pending: bool,
    driver: Rc<dyn TickDriver>,
}

impl Default for TickState {
    fn default() -> Self {
        Self {
            callbacks: Vec::new(),
            pending: false,
            driver: Rc::new(ManualTick),
        }
    }
}

/// Decides when a round of deferred callbacks runs.
///
/// [`schedule`](TickDriver::schedule) is called once per round. The driver
/// must arrange for [`run_ticks`] to be called later on the same thread.
pub trait TickDriver {
    fn schedule(&self);
}

/// Driver that leaves rounds to [`drain_ticks`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualTick;

impl TickDriver for ManualTick {
    fn schedule(&self) {}
}

/// Install the driver for this thread.
pub fn set_tick_driver(driver: impl TickDriver + 'static) {
    TICKS.with(|ticks| ticks.borrow_mut().driver = Rc::new(driver));
}

/// Defer `callback` to the next round.
pub fn next_tick(callback: impl FnOnce() + 'static) {
    let driver = TICKS.with(|ticks| {
        let mut ticks = ticks.borrow_mut();
        ticks.callbacks.push(Box::new(callback));
        if ticks.pending {
            None
        } else {
            ticks.pending = true;
            Some(ticks.driver.clone())
        }
    });

    if let Some(driver) = driver {
        driver.schedule();
    }
}

/// Run one round. Callbacks deferred while it runs wait for the next one.
///
/// Returns `false` if there was nothing to run.
pub fn run_ticks() -> bool {
    let callbacks = TICKS.with(|ticks| {
        let mut ticks = ticks.borrow_mut();
        ticks.pending = false;
        mem::take(&mut ticks.callbacks)
    });
    if callbacks.is_empty() {
        return false;
    }

    tracing::trace!(callbacks = callbacks.len(), "running tick");
    for callback in callbacks {
        callback();
    }
    true
}

/// Run rounds until none are left. Returns how many ran.
pub fn drain_ticks() -> usize {
    let mut rounds = 0;
    while run_ticks() {
        rounds += 1;
    }
    rounds
}

/// Whether callbacks are waiting for a round.
pub fn has_pending_ticks() -> bool {
    TICKS.with(|ticks| !ticks.borrow().callbacks.is_empty())
}

/// Driver that runs each round as a task on the current
/// [`LocalSet`](tokio::task::LocalSet).
///
/// Scheduling outside a `LocalSet` panics, as [`tokio::task::spawn_local`]
/// does.
#[cfg(feature = "tokio")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTick;

#[cfg(feature = "tokio")]
impl TickDriver for TokioTick {
    fn schedule(&self) {
        tokio::task::spawn_local(async {
            run_ticks();
        });
    }
}

/// Wait until the current round has run. Anything queued before this call,
/// including a pending flush, has completed when it resolves.
#[cfg(feature = "tokio")]
pub async fn next_tick_async() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
    });
    let _ = rx.await;
}
