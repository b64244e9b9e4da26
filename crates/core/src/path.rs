//! Dot-separated field paths over JSON objects.
//!
//! `a.b.c` walks nested objects. Intermediate objects are created on write.
//! Arrays are not indexed by position; a path segment that lands on an array
//! ends the walk.

use serde_json::{Map, Value};

/// Returns the value at `path`, if every segment resolves to an object key.
pub fn get<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = map.get(path) {
        return Some(v);
    }
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Returns a mutable reference to the value at `path`.
pub fn get_mut<'a>(map: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    if map.contains_key(path) {
        return map.get_mut(path);
    }
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get_mut(first)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

/// Writes `value` at `path`, creating or replacing intermediate objects.
pub fn set(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                set(inner, rest, value);
            }
        }
    }
}

/// Removes and returns the value at `path`.
pub fn remove(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    if map.contains_key(path) {
        return map.remove(path);
    }
    match path.rsplit_once('.') {
        None => None,
        Some((parent, last)) => get_mut(map, parent)?.as_object_mut()?.remove(last),
    }
}

/// Returns the first segment of a path.
pub fn head(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_get_nested() {
        let map = obj(json!({ "a": { "b": { "c": 1 } }, "x": 2 }));
        assert_eq!(get(&map, "a.b.c"), Some(&json!(1)));
        assert_eq!(get(&map, "x"), Some(&json!(2)));
        assert_eq!(get(&map, "a.z"), None);
        assert_eq!(get(&map, "x.y"), None);
    }

    #[test]
    fn test_get_literal_dotted_key() {
        let map = obj(json!({ "a.b": 5 }));
        assert_eq!(get(&map, "a.b"), Some(&json!(5)));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut map = Map::new();
        set(&mut map, "a.b.c", json!(true));
        assert_eq!(Value::Object(map), json!({ "a": { "b": { "c": true } } }));
    }

    #[test]
    fn test_set_replaces_scalar_intermediate() {
        let mut map = obj(json!({ "a": 1 }));
        set(&mut map, "a.b", json!(2));
        assert_eq!(Value::Object(map), json!({ "a": { "b": 2 } }));
    }

    #[test]
    fn test_remove() {
        let mut map = obj(json!({ "a": { "b": 1, "c": 2 } }));
        assert_eq!(remove(&mut map, "a.b"), Some(json!(1)));
        assert_eq!(Value::Object(map.clone()), json!({ "a": { "c": 2 } }));
        assert_eq!(remove(&mut map, "missing"), None);
    }

    #[test]
    fn test_head() {
        assert_eq!(head("a.b.c"), "a");
        assert_eq!(head("a"), "a");
    }
}
