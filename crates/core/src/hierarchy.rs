//! The classifier graph.
//!
//! `Hierarchy` holds every classifier (class, mixin, interface) and the
//! attributes declared on them. For each classifier it keeps:
//!
//! - the ancestor chain, computed by BFS over `extends ∪ implements` and
//!   starting with the classifier itself
//! - the descendant list, maintained incrementally: when a classifier is
//!   added, updated or removed only it and its descendants are relinked
//!
//! Domains and mixin layouts are memoized behind `RefCell`s so lookups work
//! through `&self`; both memos are invalidated on schema changes.
//!
//! The graph is assumed to be a DAG. Unknown classifiers make the `get_*`
//! accessors fail with `Error::ClassNotFound`, while the `is_*` predicates
//! simply answer `false`.

use crate::classifier::{Attribute, Classifier, ClassifierKind};
use crate::doc::Doc;
use crate::error::{Error, Result};
use crate::ids::{class, Domain, Ref};
use crate::mixin::{MixinLayout, MixinView, MixinViewMut};
use crate::tx::{Tx, TxBody};
use hashbrown::{HashMap, HashSet};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{trace, warn};

/// The schema graph of classes, mixins and interfaces.
#[derive(Debug, Default)]
pub struct Hierarchy {
    classifiers: HashMap<Ref, Classifier>,
    ancestors: HashMap<Ref, Vec<Ref>>,
    descendants: HashMap<Ref, Vec<Ref>>,
    /// Class id -> attributes declared directly on it.
    attributes: HashMap<Ref, Vec<Attribute>>,
    /// Attribute id -> declaring class.
    attribute_owner: HashMap<Ref, Ref>,
    domains: RefCell<HashMap<Ref, Domain>>,
    layouts: RefCell<HashMap<Ref, Rc<MixinLayout>>>,
}

impl Hierarchy {
    /// Creates an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hierarchy holding the bootstrap model.
    pub fn with_genesis() -> Self {
        let mut hierarchy = Self::new();
        for tx in crate::genesis::genesis_txes() {
            if let Err(err) = hierarchy.tx(&tx) {
                warn!(object_id = %tx.object_id, error = %err, "skipping genesis transaction");
            }
        }
        hierarchy
    }

    // ==================== Classifiers ====================

    /// Adds a classifier, replacing any classifier with the same id.
    pub fn add_classifier(&mut self, classifier: Classifier) {
        let id = classifier.id.clone();
        trace!(classifier = %id, kind = ?classifier.kind, "add classifier");
        self.classifiers.insert(id.clone(), classifier);
        self.relink(&id);
    }

    /// Removes a classifier and unlinks it from the descendant index.
    pub fn remove_classifier(&mut self, id: &str) -> Result<Classifier> {
        let removed = self
            .classifiers
            .remove(id)
            .ok_or_else(|| Error::class_not_found(id))?;
        let affected = self.affected(id);
        for node in &affected {
            self.unlink(node);
        }
        for node in affected.iter().filter(|n| n.as_str() != id) {
            self.link(node);
        }
        self.descendants.remove(id);
        self.invalidate(&affected);
        Ok(removed)
    }

    /// Returns the classifier with the given id.
    pub fn get_class(&self, id: &str) -> Result<&Classifier> {
        self.classifiers
            .get(id)
            .ok_or_else(|| Error::class_not_found(id))
    }

    pub fn has_class(&self, id: &str) -> bool {
        self.classifiers.contains_key(id)
    }

    pub fn is_mixin(&self, id: &str) -> bool {
        self.classifiers
            .get(id)
            .map_or(false, |c| c.kind == ClassifierKind::Mixin)
    }

    pub fn is_interface(&self, id: &str) -> bool {
        self.classifiers
            .get(id)
            .map_or(false, |c| c.kind == ClassifierKind::Interface)
    }

    /// Iterates over every classifier.
    pub fn classifiers(&self) -> impl Iterator<Item = &Classifier> {
        self.classifiers.values()
    }

    /// Returns the ancestor chain of `id`, starting with `id` itself.
    pub fn get_ancestors(&self, id: &str) -> Result<&[Ref]> {
        self.get_class(id)?;
        Ok(self.ancestors.get(id).map(Vec::as_slice).unwrap_or_default())
    }

    /// Returns every classifier deriving from `id`, including `id` itself.
    pub fn get_descendants(&self, id: &str) -> Result<&[Ref]> {
        self.get_class(id)?;
        Ok(self.descendants.get(id).map(Vec::as_slice).unwrap_or_default())
    }

    /// Returns true if `base` is on the `extends` chain of `class`.
    ///
    /// A class is derived from itself. `implements` edges are not followed.
    pub fn is_derived(&self, class: &str, base: &str) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == base {
                return true;
            }
            current = self.classifiers.get(id).and_then(|c| c.extends.as_deref());
        }
        false
    }

    /// Returns true if `class` or one of its `extends` ancestors implements
    /// `iface` or an interface deriving from it.
    pub fn is_implements(&self, class: &str, iface: &str) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            let Some(c) = self.classifiers.get(id) else {
                return false;
            };
            let hit = c.implements.iter().any(|i| match self.ancestors.get(i) {
                Some(chain) => chain.iter().any(|a| a == iface),
                None => i == iface,
            });
            if hit {
                return true;
            }
            current = c.extends.as_deref();
        }
        false
    }

    /// Returns the storage domain of `id`: its own or the nearest ancestor's.
    pub fn get_domain(&self, id: &str) -> Result<Domain> {
        if let Some(domain) = self.domains.borrow().get(id) {
            return Ok(domain.clone());
        }
        let mut current = self.get_class(id)?;
        let domain = loop {
            if let Some(domain) = &current.domain {
                break domain.clone();
            }
            match &current.extends {
                Some(parent) => current = self.get_class(parent)?,
                None => return Err(Error::domain_not_found(id)),
            }
        };
        self.domains
            .borrow_mut()
            .insert(id.to_string(), domain.clone());
        Ok(domain)
    }

    /// Walks `extends` from a mixin or interface until it reaches a class.
    pub fn get_base_class(&self, id: &str) -> Result<Ref> {
        let mut current = self.get_class(id)?;
        while current.kind != ClassifierKind::Class {
            match &current.extends {
                Some(parent) => current = self.get_class(parent)?,
                None => break,
            }
        }
        Ok(current.id.clone())
    }

    /// Resolves mixins to their base class and leaves classes unchanged.
    pub fn class_or_base(&self, id: &str) -> Ref {
        if self.is_mixin(id) {
            self.get_base_class(id).unwrap_or_else(|_| id.to_string())
        } else {
            id.to_string()
        }
    }

    fn affected(&self, id: &str) -> Vec<Ref> {
        let mut nodes = vec![id.to_string()];
        if let Some(desc) = self.descendants.get(id) {
            nodes.extend(desc.iter().filter(|d| d.as_str() != id).cloned());
        }
        nodes
    }

    fn relink(&mut self, id: &str) {
        let affected = self.affected(id);
        for node in &affected {
            self.unlink(node);
        }
        for node in &affected {
            self.link(node);
        }
        self.invalidate(&affected);
    }

    fn link(&mut self, id: &str) {
        let chain = self.compute_ancestors(id);
        for ancestor in &chain {
            let list = self.descendants.entry(ancestor.clone()).or_default();
            if !list.iter().any(|d| d == id) {
                list.push(id.to_string());
            }
        }
        self.ancestors.insert(id.to_string(), chain);
    }

    fn unlink(&mut self, id: &str) {
        if let Some(chain) = self.ancestors.remove(id) {
            for ancestor in chain {
                if let Some(list) = self.descendants.get_mut(&ancestor) {
                    list.retain(|d| d != id);
                }
            }
        }
    }

    fn compute_ancestors(&self, id: &str) -> Vec<Ref> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(c) = self.classifiers.get(&node) {
                queue.extend(c.extends.iter().cloned());
                queue.extend(c.implements.iter().cloned());
            }
            chain.push(node);
        }
        chain
    }

    fn invalidate(&self, nodes: &[Ref]) {
        let mut domains = self.domains.borrow_mut();
        for node in nodes {
            domains.remove(node);
        }
        self.layouts.borrow_mut().clear();
    }

    // ==================== Attributes ====================

    /// Declares an attribute, replacing one with the same id.
    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.remove_attribute(&attribute.id);
        self.attribute_owner
            .insert(attribute.id.clone(), attribute.attribute_of.clone());
        self.attributes
            .entry(attribute.attribute_of.clone())
            .or_default()
            .push(attribute);
        self.layouts.borrow_mut().clear();
    }

    /// Removes an attribute by id.
    pub fn remove_attribute(&mut self, id: &str) -> Option<Attribute> {
        let owner = self.attribute_owner.remove(id)?;
        let list = self.attributes.get_mut(&owner)?;
        let pos = list.iter().position(|a| a.id == id)?;
        self.layouts.borrow_mut().clear();
        Some(list.remove(pos))
    }

    /// Attributes declared directly on `class`.
    pub fn own_attributes(&self, class: &str) -> &[Attribute] {
        self.attributes
            .get(class)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Finds an attribute declared on `class` or any ancestor.
    pub fn find_attribute(&self, class: &str, name: &str) -> Option<&Attribute> {
        let chain = self.ancestors.get(class)?;
        chain
            .iter()
            .flat_map(|c| self.own_attributes(c))
            .find(|a| a.name == name)
    }

    /// Like `find_attribute` but fails with `AttributeNotFound`.
    pub fn get_attribute(&self, class: &str, name: &str) -> Result<&Attribute> {
        self.get_class(class)?;
        self.find_attribute(class, name)
            .ok_or_else(|| Error::attribute_not_found(class, name))
    }

    /// Every attribute visible on `class`; nearer declarations shadow farther ones.
    pub fn get_all_attributes(&self, class: &str) -> Result<Vec<&Attribute>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for c in self.get_ancestors(class)? {
            for attr in self.own_attributes(c) {
                if seen.insert(attr.name.as_str()) {
                    result.push(attr);
                }
            }
        }
        Ok(result)
    }

    // ==================== Mixins ====================

    /// Returns the memoized field layout of a mixin.
    pub fn mixin_layout(&self, mixin: &str) -> Result<Rc<MixinLayout>> {
        if let Some(layout) = self.layouts.borrow().get(mixin) {
            return Ok(Rc::clone(layout));
        }
        let layout = Rc::new(MixinLayout::build(self, mixin)?);
        self.layouts
            .borrow_mut()
            .insert(mixin.to_string(), Rc::clone(&layout));
        Ok(layout)
    }

    /// Views `doc` through `mixin`.
    pub fn as_mixin<'a>(&self, doc: &'a Doc, mixin: &str) -> Result<MixinView<'a>> {
        Ok(MixinView::new(doc, self.mixin_layout(mixin)?))
    }

    /// Views `doc` through `mixin` with write-through access.
    pub fn as_mixin_mut<'a>(&self, doc: &'a mut Doc, mixin: &str) -> Result<MixinViewMut<'a>> {
        Ok(MixinViewMut::new(doc, self.mixin_layout(mixin)?))
    }

    /// Returns true if `doc` carries data for `mixin`.
    pub fn has_mixin(&self, doc: &Doc, mixin: &str) -> bool {
        doc.has_mixin_data(mixin)
    }

    // ==================== Schema transactions ====================

    /// Returns true if transactions on `object_class` mutate the schema.
    pub fn is_schema_class(object_class: &str) -> bool {
        ClassifierKind::from_object_class(object_class).is_some()
            || object_class == class::ATTRIBUTE
    }

    /// Applies a schema transaction. Other transactions are ignored.
    pub fn tx(&mut self, tx: &Tx) -> Result<()> {
        if let Some(kind) = ClassifierKind::from_object_class(&tx.object_class) {
            return self.tx_classifier(tx, kind);
        }
        if tx.object_class == class::ATTRIBUTE {
            return self.tx_attribute(tx);
        }
        Ok(())
    }

    fn tx_classifier(&mut self, tx: &Tx, kind: ClassifierKind) -> Result<()> {
        match &tx.body {
            TxBody::CreateDoc { attributes } => {
                self.add_classifier(Classifier::from_attributes(&tx.object_id, kind, attributes));
            }
            TxBody::UpdateDoc { operations } => {
                let current = self.get_class(&tx.object_id)?;
                let kind = current.kind;
                let mut attrs = current.to_attributes();
                operations.apply(&mut attrs);
                self.add_classifier(Classifier::from_attributes(&tx.object_id, kind, &attrs));
            }
            TxBody::RemoveDoc => {
                self.remove_classifier(&tx.object_id)?;
            }
            TxBody::Mixin { .. } => {}
        }
        Ok(())
    }

    fn tx_attribute(&mut self, tx: &Tx) -> Result<()> {
        match &tx.body {
            TxBody::CreateDoc { attributes } => {
                self.add_attribute(Attribute::from_attributes(&tx.object_id, attributes)?);
            }
            TxBody::UpdateDoc { operations } => {
                let current = self
                    .attribute_owner
                    .get(&tx.object_id)
                    .and_then(|owner| self.attributes.get(owner))
                    .and_then(|list| list.iter().find(|a| a.id == tx.object_id))
                    .ok_or_else(|| Error::attribute_not_found(class::ATTRIBUTE, &tx.object_id))?;
                let mut attrs = current.to_attributes();
                operations.apply(&mut attrs);
                let updated = Attribute::from_attributes(&tx.object_id, &attrs)?;
                self.add_attribute(updated);
            }
            TxBody::RemoveDoc => {
                self.remove_attribute(&tx.object_id)
                    .ok_or_else(|| Error::attribute_not_found(class::ATTRIBUTE, &tx.object_id))?;
            }
            TxBody::Mixin { .. } => {}
        }
        Ok(())
    }
}
