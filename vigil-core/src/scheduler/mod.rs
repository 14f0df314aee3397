//! Scheduling
//!
//! Two cooperating queues, both per thread:
//!
//! - the [watcher queue](queue_watcher), which batches watcher re-runs and
//!   flushes them in creation order;
//! - the [tick queue](next_tick), which decides when that flush (and any
//!   other deferred callback) actually runs.

mod queue;
mod tick;

pub use queue::{after_flush, is_flushing, pending, queue_watcher, reset};
pub use tick::{
    drain_ticks, has_pending_ticks, next_tick, run_ticks, set_tick_driver, ManualTick, TickDriver,
};

#[cfg(feature = "tokio")]
pub use tick::{next_tick_async, TokioTick};
