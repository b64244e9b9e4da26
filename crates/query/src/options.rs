//! Find options: limit, sort, lookup, total, projection.

use crate::predicate::DocumentQuery;
use livedoc_core::{Doc, Ref};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sort direction for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortingOrder {
    Ascending,
    Descending,
}

/// Ordered list of sort keys, most significant first.
pub type SortingQuery = Vec<(String, SortingOrder)>;

/// A forward lookup: the source field holds the id of a `class` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupTarget {
    pub class: Ref,
    /// Lookups resolved on the target document itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<Lookup>>,
}

/// A reverse lookup: every `class` document whose `attach_key` field holds
/// the source document id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseLookup {
    pub class: Ref,
    #[serde(default = "default_attach_key")]
    pub attach_key: String,
}

fn default_attach_key() -> String {
    "attachedTo".to_string()
}

/// Declarative cross-document reference expansion.
///
/// Resolved documents are stored under `$lookup.<key>` of the source
/// document: a single document (or nothing) for forward lookups and a list
/// for reverse lookups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Lookup {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub forward: BTreeMap<String, LookupTarget>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reverse: BTreeMap<String, ReverseLookup>,
}

impl Lookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `field` as a reference to a `class` document.
    pub fn forward(mut self, field: &str, class: &str) -> Self {
        self.forward.insert(
            field.to_string(),
            LookupTarget {
                class: class.to_string(),
                nested: None,
            },
        );
        self
    }

    /// Like [`forward`](Self::forward) with lookups on the target document.
    pub fn forward_nested(mut self, field: &str, class: &str, nested: Lookup) -> Self {
        self.forward.insert(
            field.to_string(),
            LookupTarget {
                class: class.to_string(),
                nested: Some(Box::new(nested)),
            },
        );
        self
    }

    /// Collects `class` documents whose `attach_key` is the source id into
    /// `$lookup.<key>`.
    pub fn reverse(mut self, key: &str, class: &str, attach_key: &str) -> Self {
        self.reverse.insert(
            key.to_string(),
            ReverseLookup {
                class: class.to_string(),
                attach_key: attach_key.to_string(),
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }

    /// Canonical JSON form, stable for deep-equal lookups.
    pub fn shape_key(&self) -> String {
        canonical_json(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Options for `find_all` and live queries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: SortingQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Lookup>,
    /// Report the full match count beyond `limit`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub total: bool,
    /// Fields kept in returned documents. Header fields are always kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    /// Declared associations; carried opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associations: Option<Value>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, field: &str, order: SortingOrder) -> Self {
        self.sort.push((field.to_string(), order));
        self
    }

    pub fn with_lookup(mut self, lookup: Lookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_total(mut self, total: bool) -> Self {
        self.total = total;
        self
    }

    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_associations(mut self, associations: Value) -> Self {
        self.associations = Some(associations);
        self
    }

    /// Returns the lookup when it is present and non-empty.
    pub fn active_lookup(&self) -> Option<&Lookup> {
        self.lookup.as_ref().filter(|l| !l.is_empty())
    }

    /// Returns true if the result is bounded and its tail may be unknown.
    pub fn is_limited(&self) -> bool {
        self.limit.is_some()
    }
}

/// Result of a `find_all`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FindResult {
    pub docs: Vec<Doc>,
    /// Number of matches ignoring `limit`, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl FindResult {
    pub fn new(docs: Vec<Doc>, total: Option<usize>) -> Self {
        Self { docs, total }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.docs.iter().map(|d| d.id.as_str()).collect()
    }
}

/// Serializes a value with object keys in sorted order at every level.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::with_capacity(map.len());
                for k in keys {
                    out.insert(k.clone(), sorted(&map[k.as_str()]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Key under which deep-equal `(class, query, options)` triples coincide.
pub fn equivalence_key(class: &str, query: &DocumentQuery, options: &FindOptions) -> String {
    let value = serde_json::json!({
        "class": class,
        "query": query,
        "options": options,
    });
    canonical_json(&value)
}
