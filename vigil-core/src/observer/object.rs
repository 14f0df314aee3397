//! Reactive Objects
//!
//! A [`ReactiveObject`] is an ordered map of properties. Before it is
//! observed its properties are plain data; observing it turns each
//! enumerable property into a reactive property with its own [`Dep`]:
//!
//! - reading the property records the dep (and the dep of the value's own
//!   observer) on the current watcher;
//! - writing a different value stores it, observes it, and notifies.
//!
//! Properties can also be accessors, defined with [`PropertyDescriptor`].
//! Reactivity composes with them: reads and writes are forwarded through
//! the user's getter and setter.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::array::depend_array;
use super::value::Value;
use super::{observe, Observer};
use crate::error;
use crate::reactive::{Dep, Hook, ReactiveContext};

/// Accessor getter. Receives the object the property lives on.
pub type PropertyGetter = Arc<dyn Fn(&ReactiveObject) -> Value + Send + Sync>;

/// Accessor setter. Receives the object and the assigned value.
pub type PropertySetter = Arc<dyn Fn(&ReactiveObject, Value) + Send + Sync>;

/// Shape of a property, as passed to [`ReactiveObject::define_property`].
#[derive(Clone, Default)]
pub struct PropertyDescriptor {
    /// Stored value of a data property. Ignored when `get` is set.
    pub value: Value,
    pub get: Option<PropertyGetter>,
    pub set: Option<PropertySetter>,
    /// Whether the property may be redefined, made reactive or deleted.
    pub configurable: bool,
    /// Whether the property shows up in [`ReactiveObject::keys`].
    pub enumerable: bool,
}

impl PropertyDescriptor {
    /// A configurable, enumerable data property.
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            configurable: true,
            enumerable: true,
            ..Self::default()
        }
    }

    /// A configurable, enumerable accessor property.
    pub fn accessor<G>(get: G) -> Self
    where
        G: Fn(&ReactiveObject) -> Value + Send + Sync + 'static,
    {
        Self {
            get: Some(Arc::new(get)),
            configurable: true,
            enumerable: true,
            ..Self::default()
        }
    }

    /// Add a setter.
    pub fn with_setter<S>(mut self, set: S) -> Self
    where
        S: Fn(&ReactiveObject, Value) + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(set));
        self
    }

    pub fn non_configurable(mut self) -> Self {
        self.configurable = false;
        self
    }

    pub fn non_enumerable(mut self) -> Self {
        self.enumerable = false;
        self
    }
}

#[derive(Clone)]
struct Property {
    value: Value,
    get: Option<PropertyGetter>,
    set: Option<PropertySetter>,
    configurable: bool,
    enumerable: bool,

    /// Present once the property has been made reactive.
    binding: Option<Arc<Binding>>,
}

impl Property {
    fn data(value: Value) -> Self {
        Self {
            value,
            get: None,
            set: None,
            configurable: true,
            enumerable: true,
            binding: None,
        }
    }
}

/// Reactive state attached to one property.
struct Binding {
    dep: Dep,
    shallow: bool,

    /// Observer of the current value, if it is an observed container.
    child: Mutex<Option<Arc<Observer>>>,

    /// Invoked before every effective write.
    on_set: Option<Hook>,
}

impl Binding {
    fn depend(&self, value: &Value) {
        if !ReactiveContext::is_active() {
            return;
        }
        self.dep.depend();

        let child = self.child.lock().clone();
        if let Some(child) = child {
            child.dep().depend();
            if let Value::Array(arr) = value {
                depend_array(arr);
            }
        }
    }
}

/// An ordered map of (possibly reactive) properties.
///
/// Cloning yields another handle to the same object.
#[derive(Clone)]
pub struct ReactiveObject(Arc<ObjectInner>);

struct ObjectInner {
    props: Mutex<IndexMap<String, Property>>,

    /// Set once, when the object is first observed.
    observer: OnceLock<Arc<Observer>>,
    frozen: AtomicBool,
    extensible: AtomicBool,
    raw: AtomicBool,
}

impl ReactiveObject {
    /// Create an empty, unobserved object.
    pub fn new() -> Self {
        Self(Arc::new(ObjectInner {
            props: Mutex::new(IndexMap::new()),
            observer: OnceLock::new(),
            frozen: AtomicBool::new(false),
            extensible: AtomicBool::new(true),
            raw: AtomicBool::new(false),
        }))
    }

    /// Read a property.
    ///
    /// Inside a watcher, reading a reactive property subscribes the watcher
    /// to it. Reading a missing key subscribes to the object's own dep, so
    /// the watcher hears about the key being added with
    /// [`set`](crate::observer::set).
    pub fn get(&self, key: &str) -> Value {
        let prop = self.0.props.lock().get(key).cloned();
        let Some(prop) = prop else {
            self.track_shape();
            return Value::Null;
        };

        let value = match &prop.get {
            Some(getter) => getter(self),
            None => prop.value,
        };
        if let Some(binding) = &prop.binding {
            binding.depend(&value);
        }
        value
    }

    /// Assign a property.
    ///
    /// Assigning an existing reactive property notifies its dependents when
    /// the value changes. Assigning a new key creates a plain property that
    /// is not reactive; use [`set`](crate::observer::set) to add reactive
    /// keys to an observed object.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.is_frozen() {
            error::warn(&format!("Cannot assign to property \"{key}\" of a frozen object"));
            return;
        }

        let prop = self.0.props.lock().get(key).cloned();
        match prop {
            Some(prop) => self.write(key, prop, value),
            None if !self.is_extensible() => {
                error::warn(&format!("Cannot add property \"{key}\": object is not extensible"));
            }
            None => {
                self.0.props.lock().insert(key.to_string(), Property::data(value));
            }
        }
    }

    fn write(&self, key: &str, prop: Property, value: Value) {
        let Some(binding) = prop.binding else {
            match (&prop.get, &prop.set) {
                (_, Some(setter)) => setter(self, value),
                (Some(_), None) => {}
                (None, None) => self.store(key, value),
            }
            return;
        };

        let current = match &prop.get {
            Some(getter) => getter(self),
            None => prop.value,
        };
        if value.is_same(&current) {
            return;
        }
        if let Some(on_set) = &binding.on_set {
            on_set();
        }

        match (&prop.get, &prop.set) {
            // Accessor without a setter: the write has nowhere to go
            (Some(_), None) => return,
            (_, Some(setter)) => setter(self, value.clone()),
            (None, None) => self.store(key, value.clone()),
        }

        let child = if binding.shallow {
            None
        } else {
            observe(&value, false)
        };
        *binding.child.lock() = child;
        binding.dep.notify();
    }

    fn store(&self, key: &str, value: Value) {
        if let Some(prop) = self.0.props.lock().get_mut(key) {
            prop.value = value;
        }
    }

    /// Define or redefine a property.
    ///
    /// Returns `false` (and warns) when the existing property is not
    /// configurable, or when adding a key to a non-extensible object. The
    /// new property is not reactive until the object is observed or the key
    /// goes through [`define_reactive`](crate::observer::define_reactive).
    pub fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> bool {
        let mut props = self.0.props.lock();
        let refusal = match props.get(key) {
            Some(existing) if !existing.configurable => {
                Some(format!("Cannot redefine non-configurable property \"{key}\""))
            }
            None if !self.is_extensible() => Some(format!(
                "Cannot define property \"{key}\": object is not extensible"
            )),
            _ => None,
        };
        if let Some(msg) = refusal {
            drop(props);
            error::warn(&msg);
            return false;
        }

        props.insert(
            key.to_string(),
            Property {
                value: descriptor.value,
                get: descriptor.get,
                set: descriptor.set,
                configurable: descriptor.configurable,
                enumerable: descriptor.enumerable,
                binding: None,
            },
        );
        true
    }

    /// Install a reactive property. See
    /// [`define_reactive`](crate::observer::define_reactive).
    pub(crate) fn define_reactive(
        &self,
        key: &str,
        value: Option<Value>,
        on_set: Option<Hook>,
        shallow: bool,
    ) {
        let existing = self.0.props.lock().get(key).cloned();
        if existing.as_ref().is_some_and(|p| !p.configurable) {
            return;
        }

        let (get, set, dep) = match &existing {
            Some(p) => (
                p.get.clone(),
                p.set.clone(),
                p.binding.as_ref().map(|b| b.dep.clone()),
            ),
            None => (None, None, None),
        };

        // Without an explicit value, start from the current one. An accessor
        // without a setter is not read here, so defining the property does
        // not run the user's getter.
        let value = match (value, &existing) {
            (Some(value), _) => value,
            (None, Some(p)) => match (&p.get, &p.set) {
                (Some(getter), Some(_)) => getter(self),
                (Some(_), None) => Value::Null,
                (None, _) => p.value.clone(),
            },
            (None, None) => Value::Null,
        };

        let child = if shallow { None } else { observe(&value, false) };
        let binding = Arc::new(Binding {
            dep: dep.unwrap_or_default(),
            shallow,
            child: Mutex::new(child),
            on_set,
        });

        self.0.props.lock().insert(
            key.to_string(),
            Property {
                value,
                get,
                set,
                configurable: true,
                enumerable: true,
                binding: Some(binding),
            },
        );
    }

    /// Enumerable keys, in insertion order.
    ///
    /// Inside a watcher this subscribes to the object's own dep, so adding
    /// or deleting keys reactively re-runs the watcher.
    pub fn keys(&self) -> Vec<String> {
        self.track_shape();
        self.own_keys()
    }

    /// Number of enumerable keys. Tracked like [`keys`](Self::keys).
    pub fn len(&self) -> usize {
        self.track_shape();
        self.0.props.lock().values().filter(|p| p.enumerable).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the object has its own property `key`. Tracked like
    /// [`keys`](Self::keys).
    pub fn contains_key(&self, key: &str) -> bool {
        self.track_shape();
        self.has_own(key)
    }

    pub(crate) fn own_keys(&self) -> Vec<String> {
        self.0
            .props
            .lock()
            .iter()
            .filter(|(_, p)| p.enumerable)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn has_own(&self, key: &str) -> bool {
        self.0.props.lock().contains_key(key)
    }

    /// Delete an own property without notifying. Returns `false` if the
    /// property is not configurable.
    pub(crate) fn remove_own(&self, key: &str) -> bool {
        let mut props = self.0.props.lock();
        match props.get(key) {
            Some(prop) if !prop.configurable => false,
            Some(_) => {
                props.shift_remove(key);
                true
            }
            None => true,
        }
    }

    fn track_shape(&self) {
        if let Some(observer) = self.observer() {
            observer.dep().depend();
        }
    }

    /// The dep of a reactive property.
    pub fn property_dep(&self, key: &str) -> Option<Dep> {
        self.0
            .props
            .lock()
            .get(key)
            .and_then(|p| p.binding.as_ref())
            .map(|b| b.dep.clone())
    }

    /// Whether `key` is a reactive property.
    pub fn is_reactive(&self, key: &str) -> bool {
        self.0
            .props
            .lock()
            .get(key)
            .is_some_and(|p| p.binding.is_some())
    }

    /// Freeze the object: no writes, no new keys, no redefinition, and it
    /// will never be observed.
    pub fn freeze(&self) {
        self.0.frozen.store(true, Ordering::SeqCst);
        self.0.extensible.store(false, Ordering::SeqCst);
        for prop in self.0.props.lock().values_mut() {
            prop.configurable = false;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::SeqCst)
    }

    /// Forbid adding new keys.
    pub fn prevent_extensions(&self) {
        self.0.extensible.store(false, Ordering::SeqCst);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.load(Ordering::SeqCst)
    }

    /// Exclude the object from observation.
    pub fn mark_raw(&self) {
        self.0.raw.store(true, Ordering::SeqCst);
    }

    pub fn is_raw(&self) -> bool {
        self.0.raw.load(Ordering::SeqCst)
    }

    /// The observer attached to this object, if it has been observed.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.0.observer.get().cloned()
    }

    pub(crate) fn attach_observer(&self, observer: Arc<Observer>) -> bool {
        self.0.observer.set(observer).is_ok()
    }

    /// Check whether two handles refer to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl Default for ReactiveObject {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ReactiveObject
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let obj = Self::new();
        {
            let mut props = obj.0.props.lock();
            for (key, value) in iter {
                props.insert(key.into(), Property::data(value.into()));
            }
        }
        obj
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Stored values only; accessors are not invoked
        let entries: Vec<(String, Value)> = self
            .0
            .props
            .lock()
            .iter()
            .map(|(key, prop)| (key.clone(), prop.value.clone()))
            .collect();
        f.debug_map().entries(entries).finish()
    }
}
