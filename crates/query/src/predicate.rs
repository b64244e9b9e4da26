//! Document query predicates.
//!
//! A [`DocumentQuery`] is the JSON form of a filter:
//!
//! ```json
//! { "space": "sp1", "rank": { "$gte": 3 }, "title": { "$like": "%bug%" } }
//! ```
//!
//! Every key is a field path and every entry must hold (conjunction). A
//! literal value means equality; an object whose keys all start with `$`
//! is a set of operator conditions. [`Predicate`] is the parsed, compiled
//! form that is evaluated against documents.

use crate::compare::compare_values;
use crate::pattern::{LikePattern, Regex};
use livedoc_core::{Doc, Error, MixinView, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

/// The JSON form of a document filter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentQuery(Map<String, Value>);

impl DocumentQuery {
    /// Creates an empty query, matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query matching a single document id.
    pub fn by_id(id: &str) -> Self {
        Self::new().with("_id", id)
    }

    /// Parses a query from a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(Error::invalid_query("query must be an object")),
        }
    }

    /// Adds a condition and returns the query.
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.0.insert(path.to_string(), value.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.0.get(path)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the id when the query selects one document by `_id`.
    pub fn single_id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for DocumentQuery {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Something a predicate can read fields from.
pub trait FieldSource {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>>;
}

impl FieldSource for Doc {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        self.get(path)
    }
}

impl FieldSource for MixinView<'_> {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        self.get(path)
    }
}

/// A single condition on a field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Exists(bool),
    Like(LikePattern),
    Regex(Regex),
    All(Vec<Value>),
    Size(usize),
}

impl Condition {
    /// Evaluates the condition against a field value, `None` if missing.
    pub fn eval(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => equals(value, expected),
            Condition::Ne(expected) => !equals(value, expected),
            Condition::In(values) => values.iter().any(|v| equals(value, v)),
            Condition::Nin(values) => !values.iter().any(|v| equals(value, v)),
            Condition::Gt(bound) => ordered(value, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => ordered(value, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => ordered(value, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => ordered(value, bound, |o| o != Ordering::Greater),
            Condition::Exists(expected) => value.is_some() == *expected,
            Condition::Like(pattern) => value
                .and_then(Value::as_str)
                .map_or(false, |s| pattern.is_match(s)),
            Condition::Regex(regex) => value
                .and_then(Value::as_str)
                .map_or(false, |s| regex.is_match(s)),
            Condition::All(values) => match value {
                Some(Value::Array(items)) => values.iter().all(|v| items.contains(v)),
                _ => false,
            },
            Condition::Size(n) => matches!(value, Some(Value::Array(items)) if items.len() == *n),
        }
    }
}

/// Equality with array containment: an array field equals `expected` if it
/// is equal as a whole or contains it. A missing field equals `null`.
fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(v) if v == expected => true,
        Some(Value::Array(items)) => items.contains(expected),
        Some(_) => false,
    }
}

/// Range comparison; only values of the same type are comparable.
fn ordered(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    let comparable = matches!(
        (value, bound),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    );
    comparable && accept(compare_values(value, bound))
}

/// All conditions on one field path.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub path: String,
    pub conditions: Vec<Condition>,
}

impl FieldPredicate {
    pub fn eval(&self, source: &dyn FieldSource) -> bool {
        let value = source.field(&self.path);
        self.conditions.iter().all(|c| c.eval(value.as_deref()))
    }

    fn is_lookup(&self) -> bool {
        self.path.starts_with("$lookup.")
    }
}

/// A compiled document query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    fields: Vec<FieldPredicate>,
}

impl Predicate {
    /// Compiles a query.
    ///
    /// Fails with `Error::InvalidQuery` on unknown operators, malformed
    /// operands and `$search`, which is not supported.
    pub fn parse(query: &DocumentQuery) -> Result<Self> {
        let mut fields = Vec::with_capacity(query.0.len());
        for (path, raw) in &query.0 {
            if path.starts_with('$') && !path.starts_with("$lookup.") {
                return Err(Error::invalid_query(format!("unsupported query key: {}", path)));
            }
            fields.push(FieldPredicate {
                path: path.clone(),
                conditions: parse_conditions(raw)?,
            });
        }
        Ok(Self { fields })
    }

    /// Evaluates every field predicate.
    pub fn matches(&self, source: &dyn FieldSource) -> bool {
        self.fields.iter().all(|f| f.eval(source))
    }

    /// Like [`matches`](Self::matches) but ignores `$lookup.` paths, which
    /// cannot be evaluated before lookups are resolved.
    pub fn matches_skip_lookup(&self, source: &dyn FieldSource) -> bool {
        self.fields
            .iter()
            .filter(|f| !f.is_lookup())
            .all(|f| f.eval(source))
    }

    /// Returns true if the predicate reads any `$lookup.` path.
    pub fn has_lookup_fields(&self) -> bool {
        self.fields.iter().any(FieldPredicate::is_lookup)
    }

    /// Returns the field paths the predicate reads.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.path.as_str())
    }

    pub fn fields(&self) -> &[FieldPredicate] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn is_operator_object(raw: &Value) -> bool {
    match raw.as_object() {
        Some(m) => !m.is_empty() && m.keys().all(|k| k.starts_with('$')),
        None => false,
    }
}

fn parse_conditions(raw: &Value) -> Result<Vec<Condition>> {
    if !is_operator_object(raw) {
        return Ok(vec![Condition::Eq(raw.clone())]);
    }
    let Some(ops) = raw.as_object() else {
        return Ok(vec![Condition::Eq(raw.clone())]);
    };
    let array = |op: &str, v: &Value| -> Result<Vec<Value>> {
        v.as_array()
            .cloned()
            .ok_or_else(|| Error::invalid_query(format!("{} expects an array", op)))
    };
    let text = |op: &str, v: &Value| -> Result<String> {
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::invalid_query(format!("{} expects a string", op)))
    };
    let mut conditions = Vec::with_capacity(ops.len());
    for (op, v) in ops {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(v.clone()),
            "$ne" => Condition::Ne(v.clone()),
            "$in" => Condition::In(array(op, v)?),
            "$nin" => Condition::Nin(array(op, v)?),
            "$gt" => Condition::Gt(v.clone()),
            "$gte" => Condition::Gte(v.clone()),
            "$lt" => Condition::Lt(v.clone()),
            "$lte" => Condition::Lte(v.clone()),
            "$exists" => Condition::Exists(
                v.as_bool()
                    .ok_or_else(|| Error::invalid_query("$exists expects a boolean"))?,
            ),
            "$like" => Condition::Like(LikePattern::new(&text(op, v)?)),
            "$regex" => {
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                Condition::Regex(Regex::new(&text(op, v)?, options)?)
            }
            "$options" => continue,
            "$all" => Condition::All(array(op, v)?),
            "$size" => Condition::Size(
                v.as_u64()
                    .ok_or_else(|| Error::invalid_query("$size expects a number"))?
                    as usize,
            ),
            "$search" => return Err(Error::invalid_query("full-text $search is not supported")),
            other => return Err(Error::invalid_query(format!("unknown query operator: {}", other))),
        };
        conditions.push(condition);
    }
    Ok(conditions)
}
