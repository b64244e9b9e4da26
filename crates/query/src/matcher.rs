//! Class-aware document matching.
//!
//! A document belongs to a query class when:
//! - the class is a plain class and the document class derives from it;
//! - the class is a mixin, the document class derives from the mixin's base
//!   class, and the document carries data for the mixin or a mixin
//!   extending it. Predicates then read fields through the mixin view;
//! - the class is an interface the document class implements.

use crate::predicate::{DocumentQuery, FieldSource, Predicate};
use livedoc_core::{ClassifierKind, Doc, Hierarchy, Ref, Result};

/// A compiled `(class, query)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMatcher {
    class: Ref,
    predicate: Predicate,
}

impl DocumentMatcher {
    pub fn new(class: &str, query: &DocumentQuery) -> Result<Self> {
        Ok(Self {
            class: class.to_string(),
            predicate: Predicate::parse(query)?,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Returns true if `doc` is an instance of the query class.
    pub fn is_member(&self, hierarchy: &Hierarchy, doc: &Doc) -> bool {
        is_instance(hierarchy, &self.class, doc)
    }

    /// Full match including `$lookup.` paths.
    pub fn matches(&self, hierarchy: &Hierarchy, doc: &Doc) -> bool {
        self.eval(hierarchy, doc, false)
    }

    /// Match that ignores `$lookup.` paths.
    pub fn matches_skip_lookup(&self, hierarchy: &Hierarchy, doc: &Doc) -> bool {
        self.eval(hierarchy, doc, true)
    }

    fn eval(&self, hierarchy: &Hierarchy, doc: &Doc, skip_lookup: bool) -> bool {
        if !self.is_member(hierarchy, doc) {
            return false;
        }
        let test = |source: &dyn FieldSource| {
            if skip_lookup {
                self.predicate.matches_skip_lookup(source)
            } else {
                self.predicate.matches(source)
            }
        };
        if hierarchy.is_mixin(&self.class) {
            match hierarchy.as_mixin(doc, &self.class) {
                Ok(view) => test(&view),
                Err(_) => false,
            }
        } else {
            test(doc)
        }
    }
}

/// Returns true if `doc` is an instance of `class` (see module docs).
pub fn is_instance(hierarchy: &Hierarchy, class: &str, doc: &Doc) -> bool {
    let Ok(classifier) = hierarchy.get_class(class) else {
        return doc.class == class;
    };
    match classifier.kind {
        ClassifierKind::Class => hierarchy.is_derived(&doc.class, class),
        ClassifierKind::Interface => hierarchy.is_implements(&doc.class, class),
        ClassifierKind::Mixin => {
            let Ok(base) = hierarchy.get_base_class(class) else {
                return false;
            };
            if !hierarchy.is_derived(&doc.class, &base) {
                return false;
            }
            match hierarchy.get_descendants(class) {
                Ok(mixins) => mixins.iter().any(|m| doc.has_mixin_data(m)),
                Err(_) => doc.has_mixin_data(class),
            }
        }
    }
}

/// One-shot match of `doc` against `(class, query)`.
pub fn match_doc(hierarchy: &Hierarchy, class: &str, query: &DocumentQuery, doc: &Doc) -> Result<bool> {
    Ok(DocumentMatcher::new(class, query)?.matches(hierarchy, doc))
}
