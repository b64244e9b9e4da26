//! Mixin views over documents.
//!
//! A mixin stores its fields in a namespace of the document keyed by the
//! mixin id. Reading through a view looks, in order, at:
//!
//! 1. the requested mixin's namespace
//! 2. the namespaces of the mixins it extends
//! 3. the base document
//! 4. default values declared on the mixin chain
//!
//! The lookup order is captured once per mixin in a [`MixinLayout`] and
//! shared by every view. Writes go to the requested mixin's namespace on the
//! underlying document.

use crate::classifier::ClassifierKind;
use crate::doc::{is_header_field, Doc};
use crate::error::Result;
use crate::hierarchy::Hierarchy;
use crate::ids::Ref;
use crate::path;
use crate::update::DocumentUpdate;
use hashbrown::HashMap;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::rc::Rc;

/// Resolved field routing for one mixin.
#[derive(Debug, Clone, PartialEq)]
pub struct MixinLayout {
    mixin: Ref,
    /// The mixin followed by the mixins it extends, nearest first.
    chain: Vec<Ref>,
    base_class: Ref,
    defaults: HashMap<String, Value>,
}

impl MixinLayout {
    pub(crate) fn build(hierarchy: &Hierarchy, mixin: &str) -> Result<Self> {
        let mut chain = Vec::new();
        let mut current = hierarchy.get_class(mixin)?;
        while current.kind == ClassifierKind::Mixin {
            chain.push(current.id.clone());
            match &current.extends {
                Some(parent) => current = hierarchy.get_class(parent)?,
                None => break,
            }
        }

        let mut defaults = HashMap::new();
        for m in &chain {
            for attr in hierarchy.own_attributes(m) {
                if let Some(value) = &attr.default_value {
                    defaults
                        .entry(attr.name.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }

        Ok(Self {
            mixin: mixin.to_string(),
            chain,
            base_class: hierarchy.get_base_class(mixin)?,
            defaults,
        })
    }

    pub fn mixin(&self) -> &str {
        &self.mixin
    }

    pub fn chain(&self) -> &[Ref] {
        &self.chain
    }

    pub fn base_class(&self) -> &str {
        &self.base_class
    }

    pub fn default_value(&self, field: &str) -> Option<&Value> {
        self.defaults.get(field)
    }
}

fn resolve<'a>(doc: &'a Doc, layout: &MixinLayout, field: &str) -> Option<Cow<'a, Value>> {
    if is_header_field(field) || field.starts_with("$lookup.") {
        return doc.get(field);
    }
    for ns in &layout.chain {
        if let Some(value) = doc.mixin_data(ns).and_then(|m| path::get(m, field)) {
            return Some(Cow::Borrowed(value));
        }
    }
    doc.get(field)
        .or_else(|| layout.default_value(field).cloned().map(Cow::Owned))
}

/// Read-only view of a document through a mixin.
#[derive(Debug, Clone)]
pub struct MixinView<'a> {
    doc: &'a Doc,
    layout: Rc<MixinLayout>,
}

impl<'a> MixinView<'a> {
    pub fn new(doc: &'a Doc, layout: Rc<MixinLayout>) -> Self {
        Self { doc, layout }
    }

    /// The underlying document.
    pub fn doc(&self) -> &'a Doc {
        self.doc
    }

    pub fn layout(&self) -> &MixinLayout {
        &self.layout
    }

    /// Returns true if the document carries data for the viewed mixin.
    pub fn has_mixin(&self) -> bool {
        self.doc.has_mixin_data(&self.layout.mixin)
    }

    /// Reads a field through the mixin chain.
    pub fn get(&self, field: &str) -> Option<Cow<'a, Value>> {
        resolve(self.doc, &self.layout, field)
    }
}

/// Write-through view of a document through a mixin.
#[derive(Debug)]
pub struct MixinViewMut<'a> {
    doc: &'a mut Doc,
    layout: Rc<MixinLayout>,
}

impl<'a> MixinViewMut<'a> {
    pub fn new(doc: &'a mut Doc, layout: Rc<MixinLayout>) -> Self {
        Self { doc, layout }
    }

    pub fn get(&self, field: &str) -> Option<Cow<'_, Value>> {
        resolve(self.doc, &self.layout, field)
    }

    /// Writes a field into the mixin namespace of the document.
    pub fn set(&mut self, field: &str, value: Value) {
        path::set(self.namespace(), field, value);
    }

    /// Removes a field from the mixin namespace.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        path::remove(self.namespace(), field)
    }

    /// Applies an update to the mixin namespace.
    pub fn apply(&mut self, update: &DocumentUpdate) {
        update.apply(self.namespace());
    }

    fn namespace(&mut self) -> &mut Map<String, Value> {
        mixin_namespace(self.doc, &self.layout.mixin)
    }
}

/// Returns the namespace of `mixin` on `doc`, creating it if absent.
pub fn mixin_namespace<'a>(doc: &'a mut Doc, mixin: &str) -> &'a mut Map<String, Value> {
    let slot = doc
        .attributes
        .entry(mixin.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("mixin namespace is always an object"),
    }
}
