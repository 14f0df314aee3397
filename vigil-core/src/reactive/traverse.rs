//! Deep traversal.
//!
//! Reads every property reachable from a value so that the current watcher
//! depends on all of it. Used by deep watchers after each evaluation.

use std::collections::HashSet;

use crate::observer::Value;

/// Recursively touch every reactive property reachable from `value`.
///
/// Frozen containers are skipped. Each container is visited once, so
/// cyclic graphs terminate.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Array(arr) => {
            if arr.is_frozen() || !seen.insert(arr.addr()) {
                return;
            }
            for item in arr.to_vec().iter().rev() {
                walk(item, seen);
            }
        }
        Value::Object(obj) => {
            if obj.is_frozen() || !seen.insert(obj.addr()) {
                return;
            }
            for key in obj.keys().iter().rev() {
                walk(&obj.get(key), seen);
            }
        }
        _ => {}
    }
}
