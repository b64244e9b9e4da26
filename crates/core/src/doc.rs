//! Documents and resolved lookup data.

use crate::ids::{Ref, Timestamp};
use crate::path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Header field names as they appear on the wire and in field paths.
pub mod field {
    pub const ID: &str = "_id";
    pub const CLASS: &str = "_class";
    pub const SPACE: &str = "space";
    pub const MODIFIED_ON: &str = "modifiedOn";
    pub const MODIFIED_BY: &str = "modifiedBy";
    pub const CREATED_ON: &str = "createdOn";
    pub const LOOKUP: &str = "$lookup";
}

/// Returns true if `path` names a document header field.
pub fn is_header_field(path: &str) -> bool {
    matches!(
        path,
        field::ID
            | field::CLASS
            | field::SPACE
            | field::MODIFIED_ON
            | field::MODIFIED_BY
            | field::CREATED_ON
    )
}

/// A resolved lookup entry attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupValue {
    /// Reverse lookup: every document attached to the owner.
    Many(Vec<Doc>),
    /// Forward lookup: the referenced document, if it exists.
    One(Option<Box<Doc>>),
}

impl LookupValue {
    /// Returns the resolved document of a forward lookup.
    pub fn as_one(&self) -> Option<&Doc> {
        match self {
            LookupValue::One(doc) => doc.as_deref(),
            LookupValue::Many(_) => None,
        }
    }

    /// Returns the resolved documents of a reverse lookup.
    pub fn as_many(&self) -> Option<&[Doc]> {
        match self {
            LookupValue::Many(docs) => Some(docs),
            LookupValue::One(_) => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            LookupValue::Many(docs) => Value::Array(docs.iter().map(Doc::to_value).collect()),
            LookupValue::One(Some(doc)) => doc.to_value(),
            LookupValue::One(None) => Value::Null,
        }
    }
}

/// A document: header fields, class attributes and mixin namespaces.
///
/// Mixin data is stored in `attributes` under the mixin id, so a mixin view
/// over a document never copies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    #[serde(rename = "_id")]
    pub id: Ref,
    #[serde(rename = "_class")]
    pub class: Ref,
    pub space: Ref,
    #[serde(rename = "modifiedOn")]
    pub modified_on: Timestamp,
    #[serde(rename = "modifiedBy")]
    pub modified_by: Ref,
    #[serde(rename = "createdOn", default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<Timestamp>,
    #[serde(rename = "$lookup", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lookup: BTreeMap<String, LookupValue>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Doc {
    /// Creates a document with empty attributes.
    pub fn new(
        id: impl Into<Ref>,
        class: impl Into<Ref>,
        space: impl Into<Ref>,
        modified_on: Timestamp,
        modified_by: impl Into<Ref>,
    ) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            space: space.into(),
            modified_on,
            modified_by: modified_by.into(),
            created_on: None,
            lookup: BTreeMap::new(),
            attributes: Map::new(),
        }
    }

    /// Sets an attribute and returns the document.
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value.into());
        self
    }

    /// Returns the value at `path`.
    ///
    /// Header fields resolve by wire name, `$lookup.<key>[.<path>]` resolves
    /// into lookup data, anything else is a dotted attribute path.
    pub fn get(&self, path: &str) -> Option<Cow<'_, Value>> {
        match path {
            field::ID => return Some(Cow::Owned(Value::String(self.id.clone()))),
            field::CLASS => return Some(Cow::Owned(Value::String(self.class.clone()))),
            field::SPACE => return Some(Cow::Owned(Value::String(self.space.clone()))),
            field::MODIFIED_ON => return Some(Cow::Owned(Value::from(self.modified_on))),
            field::MODIFIED_BY => {
                return Some(Cow::Owned(Value::String(self.modified_by.clone())))
            }
            field::CREATED_ON => return self.created_on.map(|v| Cow::Owned(Value::from(v))),
            _ => {}
        }
        if let Some(rest) = path.strip_prefix("$lookup.") {
            let (key, tail) = match rest.split_once('.') {
                Some((key, tail)) => (key, Some(tail)),
                None => (rest, None),
            };
            let value = self.lookup.get(key)?;
            return match (value, tail) {
                (_, None) => Some(Cow::Owned(value.to_value())),
                (LookupValue::One(doc), Some(tail)) => doc.as_deref()?.get(tail),
                (LookupValue::Many(docs), Some(tail)) => Some(Cow::Owned(Value::Array(
                    docs.iter()
                        .filter_map(|d| d.get(tail).map(Cow::into_owned))
                        .collect(),
                ))),
            };
        }
        path::get(&self.attributes, path).map(Cow::Borrowed)
    }

    /// Writes `value` at `path`.
    ///
    /// Header fields are coerced to their native types; a value of the wrong
    /// type for a header field is ignored.
    pub fn set(&mut self, path: &str, value: Value) {
        match path {
            field::ID => {
                if let Value::String(s) = value {
                    self.id = s;
                }
            }
            field::CLASS => {
                if let Value::String(s) = value {
                    self.class = s;
                }
            }
            field::SPACE => {
                if let Value::String(s) = value {
                    self.space = s;
                }
            }
            field::MODIFIED_ON => {
                if let Some(v) = value.as_i64() {
                    self.modified_on = v;
                }
            }
            field::MODIFIED_BY => {
                if let Value::String(s) = value {
                    self.modified_by = s;
                }
            }
            field::CREATED_ON => self.created_on = value.as_i64(),
            _ => path::set(&mut self.attributes, path, value),
        }
    }

    /// Removes the attribute at `path`.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        path::remove(&mut self.attributes, path)
    }

    /// Returns the mixin namespace stored under `mixin`, if present.
    pub fn mixin_data(&self, mixin: &str) -> Option<&Map<String, Value>> {
        self.attributes.get(mixin).and_then(Value::as_object)
    }

    /// Returns true if the document carries data for `mixin`.
    pub fn has_mixin_data(&self, mixin: &str) -> bool {
        self.mixin_data(mixin).is_some()
    }

    /// Returns the document without its lookup data.
    pub fn without_lookup(&self) -> Doc {
        Doc {
            lookup: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Keeps only the header fields and the listed attributes.
    pub fn project(&mut self, fields: &[String]) {
        self.attributes
            .retain(|key, _| fields.iter().any(|f| path::head(f) == key));
    }

    /// Converts the document into its JSON form.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(field::ID.into(), Value::String(self.id.clone()));
        map.insert(field::CLASS.into(), Value::String(self.class.clone()));
        map.insert(field::SPACE.into(), Value::String(self.space.clone()));
        map.insert(field::MODIFIED_ON.into(), Value::from(self.modified_on));
        map.insert(
            field::MODIFIED_BY.into(),
            Value::String(self.modified_by.clone()),
        );
        if let Some(created_on) = self.created_on {
            map.insert(field::CREATED_ON.into(), Value::from(created_on));
        }
        for (k, v) in &self.attributes {
            map.insert(k.clone(), v.clone());
        }
        if !self.lookup.is_empty() {
            let lookup = self
                .lookup
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect();
            map.insert(field::LOOKUP.into(), Value::Object(lookup));
        }
        Value::Object(map)
    }
}
