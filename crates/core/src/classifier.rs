//! Schema nodes: classes, mixins, interfaces and their attributes.

use crate::error::{Error, Result};
use crate::ids::{class, Domain, Ref};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassifierKind {
    Class,
    Mixin,
    Interface,
}

impl ClassifierKind {
    /// Maps a schema transaction's object class to a classifier kind.
    pub fn from_object_class(object_class: &str) -> Option<Self> {
        match object_class {
            class::CLASS => Some(ClassifierKind::Class),
            class::MIXIN => Some(ClassifierKind::Mixin),
            class::INTERFACE => Some(ClassifierKind::Interface),
            _ => None,
        }
    }

    /// Returns the class of documents describing classifiers of this kind.
    pub fn object_class(self) -> &'static str {
        match self {
            ClassifierKind::Class => class::CLASS,
            ClassifierKind::Mixin => class::MIXIN,
            ClassifierKind::Interface => class::INTERFACE,
        }
    }
}

/// A node of the schema graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Classifier {
    pub id: Ref,
    pub kind: ClassifierKind,
    pub extends: Option<Ref>,
    pub implements: Vec<Ref>,
    pub domain: Option<Domain>,
    pub label: Option<String>,
}

impl Classifier {
    /// Creates a classifier of the given kind with no parents.
    pub fn new(id: impl Into<Ref>, kind: ClassifierKind) -> Self {
        Self {
            id: id.into(),
            kind,
            extends: None,
            implements: Vec::new(),
            domain: None,
            label: None,
        }
    }

    /// Creates a class.
    pub fn class(id: impl Into<Ref>) -> Self {
        Self::new(id, ClassifierKind::Class)
    }

    /// Creates a mixin over `extends`.
    pub fn mixin(id: impl Into<Ref>, extends: impl Into<Ref>) -> Self {
        Self::new(id, ClassifierKind::Mixin).extending(extends)
    }

    /// Creates an interface.
    pub fn interface(id: impl Into<Ref>) -> Self {
        Self::new(id, ClassifierKind::Interface)
    }

    pub fn extending(mut self, parent: impl Into<Ref>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn implementing(mut self, iface: impl Into<Ref>) -> Self {
        self.implements.push(iface.into());
        self
    }

    pub fn in_domain(mut self, domain: impl Into<Domain>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Reads a classifier from the attributes of a schema document.
    pub fn from_attributes(id: &str, kind: ClassifierKind, attrs: &Map<String, Value>) -> Self {
        let text = |key: &str| attrs.get(key).and_then(Value::as_str).map(str::to_string);
        let implements = attrs
            .get("implements")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: id.to_string(),
            kind,
            extends: text("extends"),
            implements,
            domain: text("domain"),
            label: text("label"),
        }
    }

    /// Writes the classifier back into schema document attributes.
    pub fn to_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        if let Some(extends) = &self.extends {
            attrs.insert("extends".into(), Value::String(extends.clone()));
        }
        if !self.implements.is_empty() {
            attrs.insert(
                "implements".into(),
                Value::Array(self.implements.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(domain) = &self.domain {
            attrs.insert("domain".into(), Value::String(domain.clone()));
        }
        if let Some(label) = &self.label {
            attrs.insert("label".into(), Value::String(label.clone()));
        }
        attrs
    }
}

/// An attribute declared on a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub id: Ref,
    pub attribute_of: Ref,
    pub name: String,
    pub default_value: Option<Value>,
    pub label: Option<String>,
}

impl Attribute {
    pub fn new(id: impl Into<Ref>, attribute_of: impl Into<Ref>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attribute_of: attribute_of.into(),
            name: name.into(),
            default_value: None,
            label: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Reads an attribute from the attributes of a schema document.
    pub fn from_attributes(id: &str, attrs: &Map<String, Value>) -> Result<Self> {
        let attribute_of = attrs
            .get("attributeOf")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_operation(format!("attribute {} has no attributeOf", id)))?;
        let name = attrs
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_operation(format!("attribute {} has no name", id)))?;
        Ok(Self {
            id: id.to_string(),
            attribute_of: attribute_of.to_string(),
            name: name.to_string(),
            default_value: attrs.get("defaultValue").cloned(),
            label: attrs.get("label").and_then(Value::as_str).map(str::to_string),
        })
    }

    pub fn to_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("attributeOf".into(), Value::String(self.attribute_of.clone()));
        attrs.insert("name".into(), Value::String(self.name.clone()));
        if let Some(default_value) = &self.default_value {
            attrs.insert("defaultValue".into(), default_value.clone());
        }
        if let Some(label) = &self.label {
            attrs.insert("label".into(), Value::String(label.clone()));
        }
        attrs
    }
}
