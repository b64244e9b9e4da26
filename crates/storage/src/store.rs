//! Document storage with class indexes.
//!
//! This module provides the `DocumentStore` struct which holds documents by
//! id and indexes every document under each ancestor of its class, so a
//! query over a base class never walks the hierarchy per document.

use hashbrown::{HashMap, HashSet};
use livedoc_core::{Doc, Error, Hierarchy, Ref, Result};

/// In-memory document storage.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: HashMap<Ref, Doc>,
    /// Class id -> ids of documents whose class derives from it.
    by_class: HashMap<Ref, HashSet<Ref>>,
}

impl DocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document, replacing any document with the same id.
    ///
    /// Fails with `ClassNotFound` if the document class is unknown.
    pub fn insert(&mut self, hierarchy: &Hierarchy, doc: Doc) -> Result<Option<Doc>> {
        let ancestors = hierarchy.get_ancestors(&doc.class)?.to_vec();
        let previous = self.remove(hierarchy, &doc.id);
        for class in ancestors {
            self.by_class.entry(class).or_default().insert(doc.id.clone());
        }
        self.docs.insert(doc.id.clone(), doc);
        Ok(previous)
    }

    /// Removes a document from the id index and every class index.
    pub fn remove(&mut self, hierarchy: &Hierarchy, id: &str) -> Option<Doc> {
        let doc = self.docs.remove(id)?;
        match hierarchy.get_ancestors(&doc.class) {
            Ok(ancestors) => {
                for class in ancestors {
                    if let Some(ids) = self.by_class.get_mut(class) {
                        ids.remove(id);
                    }
                }
            }
            Err(_) => {
                for ids in self.by_class.values_mut() {
                    ids.remove(id);
                }
            }
        }
        Some(doc)
    }

    pub fn get(&self, id: &str) -> Option<&Doc> {
        self.docs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Doc> {
        self.docs.get_mut(id)
    }

    /// Returns a document or `DocumentNotFound`.
    pub fn get_or_err(&mut self, id: &str) -> Result<&mut Doc> {
        self.docs
            .get_mut(id)
            .ok_or_else(|| Error::document_not_found(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    /// Returns every document indexed under `class`.
    pub fn find_by_class(&self, class: &str) -> Vec<&Doc> {
        match self.by_class.get(class) {
            Some(ids) => ids.iter().filter_map(|id| self.docs.get(id)).collect(),
            None => Vec::new(),
        }
    }

    /// Returns the number of documents indexed under `class`.
    pub fn class_count(&self, class: &str) -> usize {
        self.by_class.get(class).map_or(0, HashSet::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Doc> {
        self.docs.values()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn clear(&mut self) {
        self.docs.clear();
        self.by_class.clear();
    }
}
