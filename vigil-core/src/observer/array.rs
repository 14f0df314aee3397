//! Reactive Arrays
//!
//! Index reads and writes on an array are not individually tracked. Instead
//! an observed array has a single dep on its [`Observer`], and:
//!
//! - every read ([`len`](ReactiveArray::len), [`get`](ReactiveArray::get),
//!   [`to_vec`](ReactiveArray::to_vec)) depends on it;
//! - every mutating method performs the mutation, observes inserted
//!   elements, and notifies it once.
//!
//! Replacing an element by index goes through
//! [`set`](crate::observer::set), which is a splice underneath.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::value::Value;
use super::{observe, Observer};
use crate::error;

/// A shared, ordered list of values.
///
/// Cloning yields another handle to the same array.
#[derive(Clone)]
pub struct ReactiveArray(Arc<ArrayInner>);

struct ArrayInner {
    items: Mutex<Vec<Value>>,
    observer: OnceLock<Arc<Observer>>,
    frozen: AtomicBool,
    raw: AtomicBool,
}

impl ReactiveArray {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(ArrayInner {
            items: Mutex::new(items),
            observer: OnceLock::new(),
            frozen: AtomicBool::new(false),
            raw: AtomicBool::new(false),
        }))
    }

    pub fn len(&self) -> usize {
        self.track();
        self.0.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.track();
        self.0.items.lock().get(index).cloned()
    }

    /// Copy of all elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.track();
        self.items()
    }

    /// Append a value. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        self.intercept("push", |items| {
            items.push(value.clone());
            (items.len(), vec![value])
        })
        .unwrap_or_else(|| self.raw_len())
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        self.intercept("pop", |items| (items.pop(), Vec::new()))
            .flatten()
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        self.intercept("shift", |items| {
            let first = if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            };
            (first, Vec::new())
        })
        .flatten()
    }

    /// Prepend values, keeping their order. Returns the new length.
    pub fn unshift<I, V>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.intercept("unshift", |items| {
            items.splice(0..0, values.iter().cloned());
            (items.len(), values.clone())
        })
        .unwrap_or_else(|| self.raw_len())
    }

    /// Remove `delete_count` elements starting at `start` and insert `values`
    /// in their place. Out-of-range arguments are clamped. Returns the
    /// removed elements.
    pub fn splice<I, V>(&self, start: usize, delete_count: usize, values: I) -> Vec<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.intercept("splice", |items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, values.iter().cloned()).collect();
            (removed, values.clone())
        })
        .unwrap_or_default()
    }

    /// Sort by string conversion, the default ordering of script arrays.
    pub fn sort(&self) {
        self.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    }

    /// Sort with a comparator. Stable.
    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut(&Value, &Value) -> CmpOrdering,
    {
        self.intercept("sort", |items| {
            items.sort_by(|a, b| compare(a, b));
            ((), Vec::new())
        });
    }

    pub fn reverse(&self) {
        self.intercept("reverse", |items| {
            items.reverse();
            ((), Vec::new())
        });
    }

    /// Replace or append the element at `index`, padding with nulls when
    /// `index` is past the end.
    pub(crate) fn set_index(&self, index: usize, value: Value) {
        self.intercept("splice", |items| {
            if items.len() < index {
                items.resize(index, Value::Null);
            }
            let end = (index + 1).min(items.len());
            items.splice(index..end, [value.clone()]);
            ((), vec![value])
        });
    }

    /// Run a mutation, then observe what it inserted and notify once.
    ///
    /// `op` works on a copy, with no lock held, so a comparator that reads
    /// the array sees its contents and cannot deadlock. A panic in `op`
    /// leaves the array as it was. Returns `None` if the array is frozen.
    fn intercept<R>(
        &self,
        method: &str,
        op: impl FnOnce(&mut Vec<Value>) -> (R, Vec<Value>),
    ) -> Option<R> {
        if self.is_frozen() {
            error::warn(&format!("Cannot {method} a frozen array"));
            return None;
        }

        let mut items = self.items();
        let (result, inserted) = op(&mut items);
        *self.0.items.lock() = items;

        if let Some(observer) = self.observer() {
            for value in &inserted {
                observe(value, false);
            }
            tracing::trace!(method, inserted = inserted.len(), "array mutated");
            observer.dep().notify();
        }
        Some(result)
    }

    fn track(&self) {
        if let Some(observer) = self.observer() {
            observer.dep().depend();
        }
    }

    pub(crate) fn items(&self) -> Vec<Value> {
        self.0.items.lock().clone()
    }

    fn raw_len(&self) -> usize {
        self.0.items.lock().len()
    }

    /// Freeze the array: mutators become no-ops and it will never be
    /// observed.
    pub fn freeze(&self) {
        self.0.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::SeqCst)
    }

    /// Exclude the array from observation.
    pub fn mark_raw(&self) {
        self.0.raw.store(true, Ordering::SeqCst);
    }

    pub fn is_raw(&self) -> bool {
        self.0.raw.load(Ordering::SeqCst)
    }

    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.0.observer.get().cloned()
    }

    pub(crate) fn attach_observer(&self, observer: Arc<Observer>) -> bool {
        self.0.observer.set(observer).is_ok()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// Depend on the observers of every element, recursively into nested
/// arrays. Elements of an array are not reached through property getters,
/// so reading the array has to collect them here.
///
/// Each array is visited once, so an array that contains itself terminates.
pub(crate) fn depend_array(arr: &ReactiveArray) {
    let mut seen = HashSet::new();
    depend_items(arr, &mut seen);
}

fn depend_items(arr: &ReactiveArray, seen: &mut HashSet<usize>) {
    if !seen.insert(arr.addr()) {
        return;
    }
    for item in arr.items() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_items(nested, seen);
        }
    }
}

impl Default for ReactiveArray {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Into<Value>> FromIterator<V> for ReactiveArray {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Value>> for ReactiveArray {
    fn from(items: Vec<Value>) -> Self {
        Self::from_vec(items)
    }
}

impl fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items()).finish()
    }
}
