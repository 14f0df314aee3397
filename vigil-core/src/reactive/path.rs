//! Dot-delimited watch paths.
//!
//! `"user.address.city"` watches `data.user.address.city`. Segments may be
//! object keys, array indices, or `length` on arrays. Anything beyond word
//! characters, `$` and `.` is rejected; use a closure for real expressions.

use crate::observer::Value;

/// Split a path into segments, or `None` if it is not a simple path.
pub fn parse_path(path: &str) -> Option<Vec<String>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return None;
    }
    Some(path.split('.').map(str::to_string).collect())
}

/// Walk `segments` from `root`, reading each step through the reactive
/// accessors so the walk is tracked. Returns `Null` as soon as a step
/// cannot be taken.
pub fn resolve(root: &Value, segments: &[String]) -> Value {
    let mut current = root.clone();
    for segment in segments {
        current = match &current {
            Value::Object(obj) => obj.get(segment),
            Value::Array(arr) if segment == "length" => Value::from(arr.len()),
            Value::Array(arr) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| arr.get(index))
                .unwrap_or(Value::Null),
            _ => return Value::Null,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_simple_paths() {
        assert_eq!(parse_path("a.b.c"), Some(vec!["a".into(), "b".into(), "c".into()]));
        assert_eq!(parse_path("$store.count_1"), Some(vec!["$store".into(), "count_1".into()]));
        assert_eq!(parse_path("ünïcode.ok"), Some(vec!["ünïcode".into(), "ok".into()]));
    }

    #[test]
    fn rejects_expressions() {
        assert_eq!(parse_path("a + b"), None);
        assert_eq!(parse_path("a[0]"), None);
        assert_eq!(parse_path("a()"), None);
    }

    #[test]
    fn resolves_nested_values() {
        let root = Value::from(json!({ "user": { "tags": ["x", "y"] } }));

        let tag = resolve(&root, &parse_path("user.tags.1").unwrap());
        assert_eq!(tag, Value::from("y"));

        let len = resolve(&root, &parse_path("user.tags.length").unwrap());
        assert_eq!(len, Value::from(2));

        let missing = resolve(&root, &parse_path("user.name.first").unwrap());
        assert_eq!(missing, Value::Null);
    }
}
