//! Dynamic values.
//!
//! Reactive state is a graph of [`Value`]s. Primitives are stored inline;
//! arrays and objects are shared handles, so cloning a `Value` never copies
//! a container and two clones observe the same mutations.

use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::array::ReactiveArray;
use super::object::ReactiveObject;
use super::Observer;
use crate::reactive::untracked;

/// A node in a reactive state graph.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ReactiveArray),
    Object(ReactiveObject),
}

impl Value {
    /// Identity comparison used by reactive setters: strict equality, except
    /// that NaN is the same as NaN.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// Whether this is an array or an object.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ReactiveArray> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// The observer attached to this container, if it has been observed.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        match self {
            Value::Array(arr) => arr.observer(),
            Value::Object(obj) => obj.observer(),
            _ => None,
        }
    }

    /// Snapshot the graph as JSON without recording dependencies.
    ///
    /// Non-finite numbers become `null`. The graph must be acyclic.
    pub fn to_json(&self) -> serde_json::Value {
        untracked(|| self.to_json_inner())
    }

    fn to_json_inner(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if is_integral(*n) => serde_json::Value::from(*n as i64),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.to_vec().iter().map(Value::to_json_inner).collect())
            }
            Value::Object(obj) => serde_json::Value::Object(
                obj.keys()
                    .into_iter()
                    .map(|key| {
                        let value = obj.get(&key).to_json_inner();
                        (key, value)
                    })
                    .collect(),
            ),
        }
    }
}

/// Integral and exactly representable as an `i64`.
fn is_integral(n: f64) -> bool {
    n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Strict equality: numbers compare by value (NaN is never equal),
/// containers by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ReactiveArray> for Value {
    fn from(arr: ReactiveArray) -> Self {
        Value::Array(arr)
    }
}

impl From<ReactiveObject> for Value {
    fn from(obj: ReactiveObject) -> Self {
        Value::Object(obj)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Builds a fresh, unobserved graph.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        untracked(|| match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if is_integral(*n) => serializer.serialize_i64(*n as i64),
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(arr) => {
                let items = arr.to_vec();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(obj) => {
                let keys = obj.keys();
                let mut map = serializer.serialize_map(Some(keys.len()))?;
                for key in &keys {
                    map.serialize_entry(key, &obj.get(key))?;
                }
                map.end()
            }
        })
    }
}

/// String conversion as a script engine would do it: integral numbers have
/// no fraction, arrays join their items with commas.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.is_nan() => f.write_str("NaN"),
            Value::Number(n) if n.is_infinite() => {
                f.write_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Number(n) if *n == 0.0 => f.write_str("0"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e21 => write!(f, "{n:.0}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Array(arr) => {
                let items = untracked(|| arr.to_vec());
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_null() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(arr) => fmt::Debug::fmt(arr, f),
            Value::Object(obj) => fmt::Debug::fmt(obj, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_is_same_but_not_equal() {
        let nan = Value::from(f64::NAN);
        assert!(nan.is_same(&Value::from(f64::NAN)));
        assert_ne!(nan, Value::from(f64::NAN));
        assert!(!nan.is_same(&Value::from(1)));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::from(json!([1, 2]));
        let b = Value::from(json!([1, 2]));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn json_snapshot_roundtrips_structure() {
        let source = json!({ "name": "vigil", "tags": ["a", "b"], "nested": { "n": 1.5 } });
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
        assert_eq!(serde_json::to_value(&value).unwrap(), source);
    }

    #[test]
    fn display_matches_script_conversion() {
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::from(-0.0).to_string(), "0");
        assert_eq!(Value::from(1e20).to_string(), "100000000000000000000");
        assert_eq!(Value::from(-(2f64.powi(63)) * 4.0).to_string(), "-36893488147419103232");
        assert_eq!(Value::from(json!([1, null, "x"])).to_string(), "1,,x");
        assert_eq!(Value::from(json!({})).to_string(), "[object Object]");
    }
}
