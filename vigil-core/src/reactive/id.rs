//! Identifier types for the reactive system.
//!
//! Both watchers and deps are numbered from process-wide counters. Watcher
//! ids double as the flush order: a watcher created earlier always runs
//! before one created later.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a watcher.
///
/// Ids grow monotonically, so comparing two ids tells which watcher was
/// created first. Parents create their watchers before their children, which
/// is what makes sorting by id a parent-before-child order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate the next watcher ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identifier for a dep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(u64);

impl DepId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_ids_increase() {
        let id1 = WatcherId::next();
        let id2 = WatcherId::next();
        let id3 = WatcherId::next();

        assert!(id1 < id2);
        assert!(id2 < id3);
    }

    #[test]
    fn dep_ids_are_unique() {
        let a = DepId::next();
        let b = DepId::next();
        assert_ne!(a, b);
        assert!(a.raw() < b.raw());
    }
}
