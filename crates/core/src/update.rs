//! Document update operations.
//!
//! An update is an ordered list of operations parsed from its JSON form:
//!
//! ```json
//! { "title": "new", "$push": { "labels": "bug" }, "$inc": { "rank": 1 } }
//! ```
//!
//! Plain keys overwrite fields. `$`-prefixed keys apply an operator to every
//! field listed beneath them. Operations apply to a JSON object, which is
//! either a document's attribute map or one of its mixin namespaces.

use crate::error::{Error, Result};
use crate::path;
use serde_json::{Map, Number, Value};

/// How `$pull` selects elements to remove.
#[derive(Debug, Clone, PartialEq)]
pub enum PullMatcher {
    /// Remove every element equal to the value.
    Value(Value),
    /// Remove every element equal to any of the values.
    In(Vec<Value>),
    /// Remove every object whose listed fields all match.
    Fields(Map<String, Value>),
}

impl PullMatcher {
    fn matches(&self, item: &Value) -> bool {
        match self {
            PullMatcher::Value(v) => item == v,
            PullMatcher::In(values) => values.contains(item),
            PullMatcher::Fields(fields) => fields_match(item, fields),
        }
    }

    /// Returns the plain values this matcher removes.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            PullMatcher::Value(v) => vec![v],
            PullMatcher::In(values) => values.iter().collect(),
            PullMatcher::Fields(_) => Vec::new(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            PullMatcher::Value(v) => v.clone(),
            PullMatcher::In(values) => {
                let mut m = Map::new();
                m.insert("$in".into(), Value::Array(values.clone()));
                Value::Object(m)
            }
            PullMatcher::Fields(fields) => Value::Object(fields.clone()),
        }
    }
}

fn fields_match(item: &Value, fields: &Map<String, Value>) -> bool {
    match item.as_object() {
        Some(obj) => fields.iter().all(|(k, v)| path::get(obj, k) == Some(v)),
        None => false,
    }
}

/// A single update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Overwrite a field.
    Set { path: String, value: Value },
    /// Insert values into an array. `None` appends, `Some(i)` inserts at `i`.
    Push {
        path: String,
        values: Vec<Value>,
        position: Option<usize>,
    },
    /// Remove array elements.
    Pull { path: String, matcher: PullMatcher },
    /// Move an existing array element to a position, or to the end.
    Move {
        path: String,
        value: Value,
        position: Option<usize>,
    },
    /// Add to a numeric field; a missing field starts at zero.
    Inc { path: String, by: Number },
    /// Remove a field.
    Unset { path: String },
    /// Move a field's value to another key.
    Rename { from: String, to: String },
    /// Overwrite fields of array elements matching a query.
    Update {
        path: String,
        query: Map<String, Value>,
        update: Map<String, Value>,
    },
}

impl UpdateOp {
    /// Returns the field path this operation writes.
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set { path, .. }
            | UpdateOp::Push { path, .. }
            | UpdateOp::Pull { path, .. }
            | UpdateOp::Move { path, .. }
            | UpdateOp::Inc { path, .. }
            | UpdateOp::Unset { path }
            | UpdateOp::Update { path, .. } => path,
            UpdateOp::Rename { to, .. } => to,
        }
    }

    fn operator(&self) -> Option<&'static str> {
        match self {
            UpdateOp::Set { .. } => None,
            UpdateOp::Push { .. } => Some("$push"),
            UpdateOp::Pull { .. } => Some("$pull"),
            UpdateOp::Move { .. } => Some("$move"),
            UpdateOp::Inc { .. } => Some("$inc"),
            UpdateOp::Unset { .. } => Some("$unset"),
            UpdateOp::Rename { .. } => Some("$rename"),
            UpdateOp::Update { .. } => Some("$update"),
        }
    }

    fn argument(&self) -> (String, Value) {
        match self {
            UpdateOp::Set { path, value } => (path.clone(), value.clone()),
            UpdateOp::Push {
                path,
                values,
                position,
            } => match (values.as_slice(), position) {
                ([single], None) => (path.clone(), single.clone()),
                _ => {
                    let mut m = Map::new();
                    m.insert("$each".into(), Value::Array(values.clone()));
                    if let Some(p) = position {
                        m.insert("$position".into(), Value::from(*p as u64));
                    }
                    (path.clone(), Value::Object(m))
                }
            },
            UpdateOp::Pull { path, matcher } => (path.clone(), matcher.to_value()),
            UpdateOp::Move {
                path,
                value,
                position,
            } => {
                let mut m = Map::new();
                m.insert("$value".into(), value.clone());
                if let Some(p) = position {
                    m.insert("$position".into(), Value::from(*p as u64));
                }
                (path.clone(), Value::Object(m))
            }
            UpdateOp::Inc { path, by } => (path.clone(), Value::Number(by.clone())),
            UpdateOp::Unset { path } => (path.clone(), Value::String(String::new())),
            UpdateOp::Rename { from, to } => (from.clone(), Value::String(to.clone())),
            UpdateOp::Update {
                path,
                query,
                update,
            } => {
                let mut m = Map::new();
                m.insert("$query".into(), Value::Object(query.clone()));
                m.insert("$update".into(), Value::Object(update.clone()));
                (path.clone(), Value::Object(m))
            }
        }
    }

    /// Applies the operation to `target`.
    pub fn apply(&self, target: &mut Map<String, Value>) {
        match self {
            UpdateOp::Set { path: p, value } => path::set(target, p, value.clone()),
            UpdateOp::Push {
                path: p,
                values,
                position,
            } => {
                with_array(target, p, |arr| match position {
                    None => arr.extend(values.iter().cloned()),
                    Some(pos) => {
                        let at = (*pos).min(arr.len());
                        for (i, v) in values.iter().enumerate() {
                            arr.insert(at + i, v.clone());
                        }
                    }
                });
            }
            UpdateOp::Pull { path: p, matcher } => {
                with_array(target, p, |arr| arr.retain(|item| !matcher.matches(item)));
            }
            UpdateOp::Move {
                path: p,
                value,
                position,
            } => {
                with_array(target, p, |arr| {
                    if let Some(idx) = arr.iter().position(|v| v == value) {
                        let item = arr.remove(idx);
                        let at = position.unwrap_or(arr.len()).min(arr.len());
                        arr.insert(at, item);
                    }
                });
            }
            UpdateOp::Inc { path: p, by } => {
                let current = path::get(target, p).and_then(Value::as_number).cloned();
                path::set(target, p, Value::Number(add_numbers(current.as_ref(), by)));
            }
            UpdateOp::Unset { path: p } => {
                path::remove(target, p);
            }
            UpdateOp::Rename { from, to } => {
                if let Some(value) = path::remove(target, from) {
                    path::set(target, to, value);
                }
            }
            UpdateOp::Update {
                path: p,
                query,
                update,
            } => {
                with_array(target, p, |arr| {
                    for item in arr.iter_mut() {
                        if fields_match(item, query) {
                            if let Value::Object(obj) = item {
                                for (k, v) in update {
                                    path::set(obj, k, v.clone());
                                }
                            }
                        }
                    }
                });
            }
        }
    }
}

fn with_array(target: &mut Map<String, Value>, p: &str, f: impl FnOnce(&mut Vec<Value>)) {
    if let Some(Value::Array(arr)) = path::get_mut(target, p) {
        f(arr);
        return;
    }
    let mut arr = Vec::new();
    f(&mut arr);
    path::set(target, p, Value::Array(arr));
}

fn add_numbers(current: Option<&Number>, by: &Number) -> Number {
    match (current.and_then(Number::as_i64), by.as_i64()) {
        (Some(a), Some(b)) => Number::from(a.saturating_add(b)),
        (None, Some(b)) if current.is_none() => Number::from(b),
        _ => {
            let a = current.and_then(Number::as_f64).unwrap_or(0.0);
            let b = by.as_f64().unwrap_or(0.0);
            Number::from_f64(a + b).unwrap_or_else(|| Number::from(0))
        }
    }
}

/// An ordered set of update operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentUpdate {
    ops: Vec<UpdateOp>,
}

impl DocumentUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an update from its JSON form.
    ///
    /// Returns `Error::UnknownOperator` for an unsupported `$` key.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::invalid_operation("update must be an object"))?;
        let mut ops = Vec::new();
        for (key, arg) in obj {
            if !key.starts_with('$') {
                ops.push(UpdateOp::Set {
                    path: key.clone(),
                    value: arg.clone(),
                });
                continue;
            }
            let fields = arg
                .as_object()
                .ok_or_else(|| Error::invalid_operation(format!("{} expects an object", key)))?;
            for (field, v) in fields {
                ops.push(parse_op(key, field, v)?);
            }
        }
        Ok(Self { ops })
    }

    /// Converts the update back into its JSON form.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for op in &self.ops {
            let (key, arg) = op.argument();
            match op.operator() {
                None => {
                    out.insert(key, arg);
                }
                Some(operator) => {
                    let entry = out
                        .entry(operator.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(m) = entry {
                        m.insert(key, arg);
                    }
                }
            }
        }
        Value::Object(out)
    }

    /// Appends an operation.
    pub fn push_op(&mut self, op: UpdateOp) {
        self.ops.push(op);
    }

    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set {
            path: path.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn push(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push {
            path: path.to_string(),
            values: vec![value.into()],
            position: None,
        });
        self
    }

    pub fn pull(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull {
            path: path.to_string(),
            matcher: PullMatcher::Value(value.into()),
        });
        self
    }

    pub fn inc(mut self, path: &str, by: impl Into<Number>) -> Self {
        self.ops.push(UpdateOp::Inc {
            path: path.to_string(),
            by: by.into(),
        });
        self
    }

    pub fn unset(mut self, path: &str) -> Self {
        self.ops.push(UpdateOp::Unset {
            path: path.to_string(),
        });
        self
    }

    /// Returns the operations in order.
    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns every field path written by the update.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().flat_map(|op| match op {
            UpdateOp::Rename { from, to } => vec![from.as_str(), to.as_str()],
            other => vec![other.path()],
        })
    }

    /// Returns true if any written path shares its first segment with `field`.
    pub fn touches(&self, field: &str) -> bool {
        let head = path::head(field);
        self.keys().any(|k| k == field || path::head(k) == head)
    }

    /// Returns the plain overwrites.
    pub fn sets(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.ops.iter().filter_map(|op| match op {
            UpdateOp::Set { path, value } => Some((path.as_str(), value)),
            _ => None,
        })
    }

    /// Returns the paths incremented by `$inc`.
    pub fn inc_keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            UpdateOp::Inc { path, .. } => Some(path.as_str()),
            _ => None,
        })
    }

    /// Returns true if every operation is an `$inc`.
    pub fn only_inc(&self) -> bool {
        !self.ops.is_empty() && self.ops.iter().all(|op| matches!(op, UpdateOp::Inc { .. }))
    }

    /// Applies every operation to `target` in order.
    pub fn apply(&self, target: &mut Map<String, Value>) {
        for op in &self.ops {
            op.apply(target);
        }
    }
}

fn parse_op(operator: &str, field: &str, arg: &Value) -> Result<UpdateOp> {
    let path = field.to_string();
    let op = match operator {
        "$push" => match arg.as_object().and_then(|m| m.get("$each").map(|e| (m, e))) {
            Some((m, each)) => UpdateOp::Push {
                path,
                values: each
                    .as_array()
                    .cloned()
                    .ok_or_else(|| Error::invalid_operation("$each expects an array"))?,
                position: Some(position_of(m).unwrap_or(0)),
            },
            None => UpdateOp::Push {
                path,
                values: vec![arg.clone()],
                position: None,
            },
        },
        "$pull" => {
            let matcher = match arg {
                Value::Object(m) => match m.get("$in") {
                    Some(Value::Array(values)) => PullMatcher::In(values.clone()),
                    Some(_) => return Err(Error::invalid_operation("$in expects an array")),
                    None => PullMatcher::Fields(m.clone()),
                },
                other => PullMatcher::Value(other.clone()),
            };
            UpdateOp::Pull { path, matcher }
        }
        "$move" => match arg.as_object().and_then(|m| m.get("$value").map(|v| (m, v))) {
            Some((m, value)) => UpdateOp::Move {
                path,
                value: value.clone(),
                position: position_of(m),
            },
            None => UpdateOp::Move {
                path,
                value: arg.clone(),
                position: None,
            },
        },
        "$inc" => UpdateOp::Inc {
            path,
            by: arg
                .as_number()
                .cloned()
                .ok_or_else(|| Error::invalid_operation(format!("$inc of {} expects a number", field)))?,
        },
        "$unset" => UpdateOp::Unset { path },
        "$rename" => UpdateOp::Rename {
            from: path,
            to: arg
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::invalid_operation("$rename expects a field name"))?,
        },
        "$update" => {
            let m = arg
                .as_object()
                .ok_or_else(|| Error::invalid_operation("$update expects an object"))?;
            let part = |key: &str| {
                m.get(key)
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| Error::invalid_operation(format!("$update requires {}", key)))
            };
            UpdateOp::Update {
                path,
                query: part("$query")?,
                update: part("$update")?,
            }
        }
        other => return Err(Error::unknown_operator(other)),
    };
    Ok(op)
}

fn position_of(m: &Map<String, Value>) -> Option<usize> {
    m.get("$position").and_then(Value::as_u64).map(|p| p as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(doc: Value, update: Value) -> Value {
        let mut map = doc.as_object().cloned().unwrap();
        DocumentUpdate::from_value(&update).unwrap().apply(&mut map);
        Value::Object(map)
    }

    #[test]
    fn test_set_plain_keys() {
        let out = apply(json!({ "a": 1 }), json!({ "a": 2, "b.c": 3 }));
        assert_eq!(out, json!({ "a": 2, "b": { "c": 3 } }));
    }

    #[test]
    fn test_push_single_value() {
        assert_eq!(apply(json!({}), json!({ "$push": { "arr": "value" } })), json!({ "arr": ["value"] }));
    }

    #[test]
    fn test_push_each_without_position() {
        let out = apply(json!({ "arr": [1, 2] }), json!({ "$push": { "arr": { "$each": [3, 4, 5] } } }));
        assert_eq!(out["arr"], json!([3, 4, 5, 1, 2]));
    }

    #[test]
    fn test_push_each_with_position() {
        let out = apply(
            json!({ "arr": [1, 2, 3] }),
            json!({ "$push": { "arr": { "$each": [10, 20], "$position": 1 } } }),
        );
        assert_eq!(out["arr"], json!([1, 10, 20, 2, 3]));
    }

    #[test]
    fn test_push_replaces_non_array() {
        let out = apply(json!({ "field": "string", "arr": null }), json!({ "$push": { "field": "v", "arr": "v" } }));
        assert_eq!(out["field"], json!(["v"]));
        assert_eq!(out["arr"], json!(["v"]));
    }

    #[test]
    fn test_pull_value() {
        let out = apply(json!({ "arr": [1, 2, 3, 2] }), json!({ "$pull": { "arr": 2 } }));
        assert_eq!(out["arr"], json!([1, 3]));
    }

    #[test]
    fn test_pull_in() {
        let out = apply(json!({ "arr": [1, 2, 3, 4, 5] }), json!({ "$pull": { "arr": { "$in": [2, 4] } } }));
        assert_eq!(out["arr"], json!([1, 3, 5]));
    }

    #[test]
    fn test_pull_object_fields() {
        let out = apply(
            json!({ "arr": [{ "name": "a", "value": 1 }, { "name": "b", "value": 2 }, { "name": "a", "value": 3 }] }),
            json!({ "$pull": { "arr": { "name": "a", "value": 1 } } }),
        );
        assert_eq!(out["arr"], json!([{ "name": "b", "value": 2 }, { "name": "a", "value": 3 }]));

        let out = apply(
            json!({ "arr": [{ "name": "a", "value": 1 }] }),
            json!({ "$pull": { "arr": { "name": "a", "value": 999 } } }),
        );
        assert_eq!(out["arr"], json!([{ "name": "a", "value": 1 }]));
    }

    #[test]
    fn test_pull_missing_field() {
        assert_eq!(apply(json!({}), json!({ "$pull": { "arr": "v" } })), json!({ "arr": [] }));
    }

    #[test]
    fn test_move() {
        let out = apply(json!({ "arr": [1, 2, 3] }), json!({ "$move": { "arr": { "$value": 3, "$position": 0 } } }));
        assert_eq!(out["arr"], json!([3, 1, 2]));
        let out = apply(json!({ "arr": [1, 2, 3] }), json!({ "$move": { "arr": 1 } }));
        assert_eq!(out["arr"], json!([2, 3, 1]));
    }

    #[test]
    fn test_update_matching_elements() {
        let out = apply(
            json!({ "arr": [{ "name": "a", "value": 1 }, { "name": "b", "value": 2 }, { "name": "a", "value": 3 }] }),
            json!({ "$update": { "arr": { "$query": { "name": "a" }, "$update": { "value": 100 } } } }),
        );
        assert_eq!(
            out["arr"],
            json!([{ "name": "a", "value": 100 }, { "name": "b", "value": 2 }, { "name": "a", "value": 100 }])
        );
        let out = apply(json!({}), json!({ "$update": { "arr": { "$query": { "name": "a" }, "$update": { "v": 1 } } } }));
        assert_eq!(out["arr"], json!([]));
    }

    #[test]
    fn test_inc() {
        let out = apply(json!({ "count": 5, "a": 1 }), json!({ "$inc": { "count": 3, "a": -3, "fresh": 10 } }));
        assert_eq!(out, json!({ "count": 8, "a": -2, "fresh": 10 }));
        let out = apply(json!({ "f": 1.5 }), json!({ "$inc": { "f": 1 } }));
        assert_eq!(out["f"], json!(2.5));
    }

    #[test]
    fn test_unset_and_rename() {
        let out = apply(json!({ "a": 1, "b": 2, "obj": { "n": 1 } }), json!({ "$unset": { "a": "", "obj": "" } }));
        assert_eq!(out, json!({ "b": 2 }));
        let out = apply(json!({ "old": "x", "new": "y" }), json!({ "$rename": { "old": "new", "missing": "z" } }));
        assert_eq!(out, json!({ "new": "x" }));
    }

    #[test]
    fn test_unknown_operator() {
        let err = DocumentUpdate::from_value(&json!({ "$unknown": { "a": 1 } })).unwrap_err();
        assert_eq!(err.to_string(), "unknown operator: $unknown");
    }

    #[test]
    fn test_to_value_regroups_operators() {
        let update = DocumentUpdate::new().set("title", "x").inc("rank", 1).push("labels", "bug");
        let value = update.to_value();
        assert_eq!(value, json!({ "title": "x", "$inc": { "rank": 1 }, "$push": { "labels": "bug" } }));
        assert_eq!(DocumentUpdate::from_value(&value).unwrap(), update);
    }

    #[test]
    fn test_keys_and_touches() {
        let update = DocumentUpdate::new().set("meta.size", 1).inc("rank", 1);
        let keys: Vec<&str> = update.keys().collect();
        assert_eq!(keys, vec!["meta.size", "rank"]);
        assert!(update.touches("meta"));
        assert!(update.touches("rank"));
        assert!(!update.touches("title"));
        assert!(!update.only_inc());
        assert!(DocumentUpdate::new().inc("rank", 2).only_inc());
    }
}
