//! Observation
//!
//! Observing a value attaches an [`Observer`] to each container in it:
//! objects get reactive properties, arrays get intercepted mutators. The
//! observer's own dep stands for the container's shape. It fires when keys
//! are added or deleted and when an array is mutated.
//!
//! Observation is idempotent and stops at frozen or raw containers, which
//! also makes it safe on cyclic graphs.

mod array;
mod object;
mod value;

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error;
use crate::reactive::{Dep, Hook};

pub use array::ReactiveArray;
pub use object::{PropertyDescriptor, PropertyGetter, PropertySetter, ReactiveObject};
pub use value::Value;

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Per-container reactive state.
pub struct Observer {
    dep: Dep,

    /// How many scopes use this container as their root data.
    root_count: AtomicUsize,
}

impl Observer {
    fn new() -> Self {
        Self {
            dep: Dep::new(),
            root_count: AtomicUsize::new(0),
        }
    }

    /// The dep notified on structural changes.
    pub fn dep(&self) -> &Dep {
        &self.dep
    }

    pub fn root_count(&self) -> usize {
        self.root_count.load(Ordering::SeqCst)
    }

    pub(crate) fn release_root(&self) {
        let _ = self
            .root_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep.id())
            .field("root_count", &self.root_count())
            .finish()
    }
}

/// Whether [`observe`] currently attaches new observers.
pub fn should_observe() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

/// Globally enable or disable attaching new observers. Containers that are
/// already observed are unaffected.
pub fn toggle_observing(value: bool) {
    SHOULD_OBSERVE.with(|cell| cell.set(value));
}

/// Restores the previous observing state when dropped.
#[must_use = "observing is restored when the guard is dropped"]
pub struct ObservingGuard {
    previous: bool,
}

impl Drop for ObservingGuard {
    fn drop(&mut self) {
        toggle_observing(self.previous);
    }
}

/// Disable observing until the guard is dropped.
pub fn pause_observing() -> ObservingGuard {
    let previous = should_observe();
    toggle_observing(false);
    ObservingGuard { previous }
}

/// Run `f` with observing disabled.
pub fn without_observing<R>(f: impl FnOnce() -> R) -> R {
    let _guard = pause_observing();
    f()
}

/// Attach an observer to `value` if it is a container, returning it.
///
/// A container that is already observed returns its existing observer.
/// Primitives return `None`, as do frozen or raw containers and anything
/// not yet observed while observing is disabled. With `as_root`, the
/// observer's root count is incremented.
pub fn observe(value: &Value, as_root: bool) -> Option<Arc<Observer>> {
    let observer = match value {
        Value::Array(arr) => arr.observer().or_else(|| observe_array(arr)),
        Value::Object(obj) => obj.observer().or_else(|| observe_object(obj)),
        _ => None,
    };

    if as_root {
        if let Some(observer) = &observer {
            observer.root_count.fetch_add(1, Ordering::SeqCst);
        }
    }
    observer
}

fn observe_array(arr: &ReactiveArray) -> Option<Arc<Observer>> {
    if !should_observe() || arr.is_frozen() || arr.is_raw() {
        return None;
    }

    // Attach before walking so cycles find the observer
    let observer = Arc::new(Observer::new());
    if !arr.attach_observer(observer.clone()) {
        return arr.observer();
    }

    let items = arr.items();
    tracing::trace!(len = items.len(), "observing array");
    for item in &items {
        observe(item, false);
    }
    Some(observer)
}

fn observe_object(obj: &ReactiveObject) -> Option<Arc<Observer>> {
    if !should_observe() || !obj.is_extensible() || obj.is_raw() {
        return None;
    }

    let observer = Arc::new(Observer::new());
    if !obj.attach_observer(observer.clone()) {
        return obj.observer();
    }

    let keys = obj.own_keys();
    tracing::trace!(keys = keys.len(), "observing object");
    for key in &keys {
        obj.define_reactive(key, None, None, false);
    }
    Some(observer)
}

/// Make `key` on `obj` a reactive property.
///
/// With `value`, the property starts with it; otherwise the current value
/// is kept. Accessor properties keep their getter and setter, and
/// non-configurable properties are left untouched. `on_set` runs before
/// every effective write. A `shallow` property does not observe its value.
pub fn define_reactive(
    obj: &ReactiveObject,
    key: &str,
    value: Option<Value>,
    on_set: Option<Hook>,
    shallow: bool,
) {
    obj.define_reactive(key, value, on_set, shallow);
}

/// Key for [`set`] and [`del`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

/// Set a property and make sure it is reactive.
///
/// - On an array with an index: replaces the element (extending the array
///   if needed) through the intercepted splice.
/// - On an object with an existing key: a plain assignment.
/// - On an object with a new key: adds a reactive property and notifies the
///   object's observer. On an unobserved object, a plain assignment.
///
/// Adding keys to a container used as scope root data is refused with a
/// warning. So is a primitive target. Returns `value`.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) -> Value {
    let key = key.into();
    let value = value.into();

    match (target, &key) {
        (Value::Array(arr), Key::Index(index)) => {
            arr.set_index(*index, value.clone());
        }
        (Value::Array(_), Key::Name(name)) => {
            error::warn(&format!("Cannot set non-index key \"{name}\" on an array"));
        }
        (Value::Object(obj), _) => {
            let name = key.to_string();
            if obj.has_own(&name) {
                obj.set(&name, value.clone());
                return value;
            }

            let observer = obj.observer();
            if observer.as_ref().is_some_and(|ob| ob.root_count() > 0) {
                error::warn(
                    "Avoid adding reactive properties to a scope's root data at runtime; \
                     declare it upfront in the data instead",
                );
                return value;
            }
            match observer {
                None => obj.set(&name, value.clone()),
                Some(observer) => {
                    if !obj.is_extensible() {
                        error::warn(&format!(
                            "Cannot add property \"{name}\": object is not extensible"
                        ));
                        return value;
                    }
                    obj.define_reactive(&name, Some(value.clone()), None, false);
                    observer.dep().notify();
                }
            }
        }
        _ => {
            error::warn(&format!(
                "Cannot set reactive property \"{key}\" on primitive value {target}"
            ));
        }
    }
    value
}

/// Delete a property and notify if the container is observed.
///
/// - On an array with an index in range: removes the element through the
///   intercepted splice.
/// - On an object: removes the key if present and configurable, then
///   notifies the object's observer.
///
/// Deleting from scope root data or from a primitive is refused with a
/// warning.
pub fn del(target: &Value, key: impl Into<Key>) {
    let key = key.into();

    match (target, &key) {
        (Value::Array(arr), Key::Index(index)) => {
            if *index < arr.items().len() {
                arr.splice(*index, 1, Vec::<Value>::new());
            }
        }
        (Value::Array(_), Key::Name(name)) => {
            error::warn(&format!("Cannot delete non-index key \"{name}\" from an array"));
        }
        (Value::Object(obj), _) => {
            let observer = obj.observer();
            if observer.as_ref().is_some_and(|ob| ob.root_count() > 0) {
                error::warn(
                    "Avoid deleting properties on a scope's root data; just set it to null",
                );
                return;
            }

            let name = key.to_string();
            if !obj.has_own(&name) {
                return;
            }
            if !obj.remove_own(&name) {
                error::warn(&format!("Cannot delete non-configurable property \"{name}\""));
                return;
            }
            if let Some(observer) = observer {
                observer.dep().notify();
            }
        }
        _ => {
            error::warn(&format!(
                "Cannot delete reactive property \"{key}\" on primitive value {target}"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use parking_lot::Mutex;
    use serde_json::json;

    fn capture_warnings() -> Arc<Mutex<Vec<String>>> {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        config::set(Config::default().with_warn_handler(move |msg| {
            sink.lock().push(msg.to_string());
        }));
        warnings
    }

    #[test]
    fn observe_is_idempotent() {
        let value = Value::from(json!({ "a": [1, { "b": 2 }] }));
        let first = observe(&value, false).unwrap();
        let second = observe(&value, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn primitives_are_not_observed() {
        assert!(observe(&Value::from(1), false).is_none());
        assert!(observe(&Value::from("s"), true).is_none());
    }

    #[test]
    fn raw_containers_are_skipped() {
        let obj = ReactiveObject::new();
        obj.mark_raw();
        assert!(observe(&Value::Object(obj), false).is_none());
    }

    #[test]
    fn paused_observing_skips_new_containers_only() {
        let seen = Value::from(json!({ "a": 1 }));
        observe(&seen, false);

        let fresh = Value::from(json!({ "b": 1 }));
        without_observing(|| {
            assert!(observe(&fresh, false).is_none());
            assert!(observe(&seen, false).is_some());
        });
        assert!(should_observe());
        assert!(observe(&fresh, false).is_some());
    }

    #[test]
    fn root_count_tracks_root_observations() {
        let value = Value::from(json!({}));
        let observer = observe(&value, true).unwrap();
        observe(&value, true);
        assert_eq!(observer.root_count(), 2);

        observer.release_root();
        observer.release_root();
        observer.release_root();
        assert_eq!(observer.root_count(), 0);
    }

    #[test]
    fn set_adds_reactive_key_to_observed_object() {
        let value = Value::from(json!({ "a": 1 }));
        observe(&value, false);

        set(&value, "b", 2);
        let obj = value.as_object().unwrap();
        assert!(obj.is_reactive("b"));
        assert_eq!(obj.get("b"), Value::from(2));
    }

    #[test]
    fn set_on_plain_object_assigns() {
        let value = Value::from(json!({}));
        set(&value, "a", 1);
        let obj = value.as_object().unwrap();
        assert_eq!(obj.get("a"), Value::from(1));
        assert!(!obj.is_reactive("a"));
    }

    #[test]
    fn set_on_array_index_extends() {
        let value = Value::from(json!([1]));
        observe(&value, false);
        set(&value, 2usize, "x");
        assert_eq!(value.to_json(), json!([1, null, "x"]));
    }

    #[test]
    fn set_refuses_root_data_and_primitives() {
        let warnings = capture_warnings();
        let root = Value::from(json!({}));
        observe(&root, true);

        set(&root, "late", 1);
        assert!(!root.as_object().unwrap().has_own("late"));
        set(&Value::from(3), "k", 1);
        set(&Value::from(json!([])), "name", 1);

        assert_eq!(warnings.lock().len(), 3);
        config::reset();
    }

    #[test]
    fn del_removes_keys_and_elements() {
        let obj = Value::from(json!({ "a": 1, "b": 2 }));
        observe(&obj, false);
        del(&obj, "a");
        del(&obj, "missing");
        assert_eq!(obj.to_json(), json!({ "b": 2 }));

        let arr = Value::from(json!([1, 2, 3]));
        del(&arr, 1usize);
        del(&arr, 10usize);
        assert_eq!(arr.to_json(), json!([1, 3]));
    }

    #[test]
    fn del_refuses_non_configurable_and_root() {
        let warnings = capture_warnings();

        let obj = ReactiveObject::new();
        obj.define_property("k", PropertyDescriptor::data(1).non_configurable());
        del(&Value::Object(obj.clone()), "k");
        assert!(obj.has_own("k"));

        let root = Value::from(json!({ "a": 1 }));
        observe(&root, true);
        del(&root, "a");
        assert!(root.as_object().unwrap().has_own("a"));

        assert_eq!(warnings.lock().len(), 2);
        config::reset();
    }
}
