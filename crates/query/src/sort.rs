//! Result sorting.

use crate::compare::compare_optional;
use crate::options::{SortingOrder, SortingQuery};
use livedoc_core::doc::field;
use livedoc_core::{Doc, Hierarchy, MixinLayout, MixinView};
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::rc::Rc;

/// Sorts documents by a list of keys with a final `_id` tie-break.
///
/// With no keys, documents are ordered by `_id`. Fields of a mixin query
/// class are read through the mixin view.
#[derive(Debug, Clone)]
pub struct DocumentSorter {
    order_by: SortingQuery,
    layout: Option<Rc<MixinLayout>>,
}

impl DocumentSorter {
    pub fn new(hierarchy: &Hierarchy, class: &str, order_by: &SortingQuery) -> Self {
        let layout = if hierarchy.is_mixin(class) {
            hierarchy.mixin_layout(class).ok()
        } else {
            None
        };
        Self {
            order_by: order_by.clone(),
            layout,
        }
    }

    /// A sorter reading plain document fields.
    pub fn plain(order_by: &SortingQuery) -> Self {
        Self {
            order_by: order_by.clone(),
            layout: None,
        }
    }

    pub fn order_by(&self) -> &SortingQuery {
        &self.order_by
    }

    /// Returns true if `field` participates in the ordering.
    pub fn is_sort_key(&self, field: &str) -> bool {
        field == field::ID || self.order_by.iter().any(|(k, _)| k == field)
    }

    fn value<'a>(&self, doc: &'a Doc, path: &str) -> Option<Cow<'a, Value>> {
        match &self.layout {
            Some(layout) => MixinView::new(doc, Rc::clone(layout)).get(path),
            None => doc.get(path),
        }
    }

    pub fn compare(&self, a: &Doc, b: &Doc) -> Ordering {
        for (path, order) in &self.order_by {
            let av = self.value(a, path);
            let bv = self.value(b, path);
            let cmp = compare_optional(av.as_deref(), bv.as_deref());
            if cmp != Ordering::Equal {
                return match order {
                    SortingOrder::Ascending => cmp,
                    SortingOrder::Descending => cmp.reverse(),
                };
            }
        }
        a.id.cmp(&b.id)
    }

    /// Stable in-place sort.
    pub fn sort(&self, docs: &mut [Doc]) {
        docs.sort_by(|a, b| self.compare(a, b));
    }

    /// Index at which `doc` keeps `docs` ordered.
    pub fn insert_position(&self, docs: &[Doc], doc: &Doc) -> usize {
        docs.partition_point(|d| self.compare(d, doc) != Ordering::Greater)
    }

    /// Returns true if `docs` is ordered.
    pub fn is_sorted(&self, docs: &[Doc]) -> bool {
        docs.windows(2)
            .all(|w| self.compare(&w[0], &w[1]) != Ordering::Greater)
    }
}

/// Sorts `docs` for a query over `class`.
pub fn result_sort(hierarchy: &Hierarchy, class: &str, order_by: &SortingQuery, docs: &mut [Doc]) {
    DocumentSorter::new(hierarchy, class, order_by).sort(docs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedoc_core::{class, Attribute, Classifier};
    use serde_json::json;

    fn doc(id: &str, name: Option<&str>) -> Doc {
        let d = Doc::new(id, "task:class:Task", "sp", 1, "u");
        match name {
            Some(n) => d.with("name", n),
            None => d,
        }
    }

    fn ids(docs: &[Doc]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_sort_ascending_none_first() {
        let mut docs = vec![doc("1", Some("b")), doc("2", None), doc("3", Some("a"))];
        let sorter = DocumentSorter::plain(&vec![("name".into(), SortingOrder::Ascending)]);
        sorter.sort(&mut docs);
        assert_eq!(ids(&docs), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_sort_descending() {
        let mut docs = vec![doc("1", Some("b")), doc("2", None), doc("3", Some("a"))];
        let sorter = DocumentSorter::plain(&vec![("name".into(), SortingOrder::Descending)]);
        sorter.sort(&mut docs);
        assert_eq!(ids(&docs), vec!["1", "3", "2"]);
    }

    #[test]
    fn test_default_order_is_id() {
        let mut docs = vec![doc("c", None), doc("a", None), doc("b", None)];
        DocumentSorter::plain(&Vec::new()).sort(&mut docs);
        assert_eq!(ids(&docs), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_id_tie_break() {
        let mut docs = vec![doc("z", Some("same")), doc("y", Some("same"))];
        DocumentSorter::plain(&vec![("name".into(), SortingOrder::Descending)]).sort(&mut docs);
        assert_eq!(ids(&docs), vec!["y", "z"]);
    }

    #[test]
    fn test_insert_position() {
        let sorter = DocumentSorter::plain(&vec![("name".into(), SortingOrder::Ascending)]);
        let docs = vec![doc("1", Some("a")), doc("2", Some("c"))];
        assert_eq!(sorter.insert_position(&docs, &doc("3", Some("b"))), 1);
        assert_eq!(sorter.insert_position(&docs, &doc("0", Some("0"))), 0);
        assert_eq!(sorter.insert_position(&docs, &doc("9", Some("z"))), 2);
        assert!(sorter.is_sorted(&docs));
    }

    #[test]
    fn test_mixin_sort_uses_defaults() {
        let mut h = Hierarchy::with_genesis();
        h.add_classifier(Classifier::class("task:class:Task").extending(class::DOC));
        h.add_classifier(Classifier::mixin("task:mixin:Due", "task:class:Task"));
        h.add_attribute(Attribute::new("a", "task:mixin:Due", "due").with_default(5));
        let mut docs = vec![
            doc("1", None).with("task:mixin:Due", json!({ "due": 9 })),
            doc("2", None).with("task:mixin:Due", json!({})),
            doc("3", None).with("task:mixin:Due", json!({ "due": 1 })),
        ];
        result_sort(&h, "task:mixin:Due", &vec![("due".into(), SortingOrder::Ascending)], &mut docs);
        assert_eq!(ids(&docs), vec!["3", "2", "1"]);
    }
}
