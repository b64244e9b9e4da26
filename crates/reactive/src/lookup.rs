//! Lookup ways and in-place lookup patching.
//!
//! A lookup way says where, inside a cached result document, a document of
//! some class may appear as resolved lookup data. Ways are computed once per
//! `(lookup shape, class)` pair and memoized; transaction routing uses them
//! to patch `$lookup` entries without resolving lookups again.

use hashbrown::HashMap;
use livedoc_core::apply::apply_tx;
use livedoc_core::{Doc, Hierarchy, LookupValue, Ref, Tx};
use livedoc_query::Lookup;
use serde_json::Value;
use std::rc::Rc;

/// One place a document of a given class can appear in lookup data.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupWay {
    /// Forward lookup keys leading from the result document to the owner of
    /// the `$lookup` entry. Empty for the result document itself.
    pub path: Vec<String>,
    /// Key of the `$lookup` entry.
    pub key: String,
    /// Attach key of a reverse lookup, `None` for forward lookups.
    pub reverse_key: Option<String>,
    /// Nested lookup resolved on the target of a forward lookup.
    pub nested: Option<Lookup>,
}

impl LookupWay {
    pub fn is_reverse(&self) -> bool {
        self.reverse_key.is_some()
    }
}

/// Computes the ways a `class` document can appear under `lookup`.
pub fn lookup_ways(hierarchy: &Hierarchy, lookup: &Lookup, class: &str) -> Vec<LookupWay> {
    let mut ways = Vec::new();
    collect_ways(hierarchy, lookup, class, &[], &mut ways);
    ways
}

fn collect_ways(
    hierarchy: &Hierarchy,
    lookup: &Lookup,
    class: &str,
    parent: &[String],
    ways: &mut Vec<LookupWay>,
) {
    for (key, reverse) in &lookup.reverse {
        if hierarchy.is_derived(class, &hierarchy.class_or_base(&reverse.class)) {
            ways.push(LookupWay {
                path: parent.to_vec(),
                key: key.clone(),
                reverse_key: Some(reverse.attach_key.clone()),
                nested: None,
            });
        }
    }
    for (key, target) in &lookup.forward {
        if hierarchy.is_derived(class, &hierarchy.class_or_base(&target.class)) {
            ways.push(LookupWay {
                path: parent.to_vec(),
                key: key.clone(),
                reverse_key: None,
                nested: target.nested.as_deref().cloned(),
            });
        }
        if let Some(nested) = &target.nested {
            let mut path = parent.to_vec();
            path.push(key.clone());
            collect_ways(hierarchy, nested, class, &path, ways);
        }
    }
}

/// Memoized [`lookup_ways`].
///
/// Must be cleared whenever the hierarchy changes.
#[derive(Debug, Default)]
pub struct LookupWays {
    memo: HashMap<(String, Ref), Rc<[LookupWay]>>,
}

impl LookupWays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, hierarchy: &Hierarchy, lookup: &Lookup, class: &str) -> Rc<[LookupWay]> {
        let key = (lookup.shape_key(), class.to_string());
        if let Some(ways) = self.memo.get(&key) {
            return Rc::clone(ways);
        }
        let ways: Rc<[LookupWay]> = lookup_ways(hierarchy, lookup, class).into();
        self.memo.insert(key, Rc::clone(&ways));
        ways
    }

    pub fn clear(&mut self) {
        self.memo.clear();
    }
}

/// Follows forward lookup keys from `doc` to the document owning the entry.
pub fn lookup_owner<'a>(doc: &'a Doc, path: &[String]) -> Option<&'a Doc> {
    path.iter()
        .try_fold(doc, |current, key| current.lookup.get(key)?.as_one())
}

/// Mutable form of [`lookup_owner`].
pub fn lookup_owner_mut<'a>(doc: &'a mut Doc, path: &[String]) -> Option<&'a mut Doc> {
    let mut current = doc;
    for key in path {
        current = match current.lookup.get_mut(key) {
            Some(LookupValue::One(Some(inner))) => &mut **inner,
            _ => return None,
        };
    }
    Some(current)
}

fn field_is(doc: &Doc, field: &str, id: &str) -> bool {
    doc.get(field).as_deref().and_then(Value::as_str) == Some(id)
}

fn insert_by_id(docs: &mut Vec<Doc>, doc: Doc) {
    let at = docs.partition_point(|d| d.id < doc.id);
    docs.insert(at, doc);
}

/// Patches a newly created document into lookup data.
///
/// `placed[i]` is the document stored for `ways[i]`: the created document
/// itself, with its nested lookups resolved when the way has any. Returns
/// true if any result document changed.
pub fn patch_added(docs: &mut [Doc], ways: &[LookupWay], placed: &[Doc]) -> bool {
    let mut changed = false;
    for (way, doc) in ways.iter().zip(placed) {
        for result in docs.iter_mut() {
            let Some(owner) = lookup_owner_mut(result, &way.path) else {
                continue;
            };
            match &way.reverse_key {
                Some(attach_key) => {
                    if !field_is(doc, attach_key, &owner.id) {
                        continue;
                    }
                    let entry = owner
                        .lookup
                        .entry(way.key.clone())
                        .or_insert_with(|| LookupValue::Many(Vec::new()));
                    if let LookupValue::Many(items) = entry {
                        if !items.iter().any(|d| d.id == doc.id) {
                            insert_by_id(items, doc.clone());
                            changed = true;
                        }
                    }
                }
                None => {
                    if field_is(owner, &way.key, &doc.id) {
                        owner
                            .lookup
                            .insert(way.key.clone(), LookupValue::One(Some(Box::new(doc.clone()))));
                        changed = true;
                    }
                }
            }
        }
    }
    changed
}

/// Returns the new attach key value written by an update, if any.
fn reattached_to<'a>(tx: &'a Tx, attach_key: &str) -> Option<&'a Value> {
    tx.operations()?
        .sets()
        .find(|(path, _)| *path == attach_key)
        .map(|(_, value)| value)
}

/// Returns true if patching `tx` into lookup data needs the current state of
/// the updated document: it was attached to a result document it is not yet
/// listed under.
pub fn update_needs_document(docs: &[Doc], ways: &[LookupWay], tx: &Tx) -> bool {
    for way in ways {
        let Some(attach_key) = &way.reverse_key else {
            continue;
        };
        let Some(target) = reattached_to(tx, attach_key).and_then(Value::as_str) else {
            continue;
        };
        for result in docs {
            let Some(owner) = lookup_owner(result, &way.path) else {
                continue;
            };
            let listed = owner
                .lookup
                .get(&way.key)
                .and_then(LookupValue::as_many)
                .map_or(false, |items| items.iter().any(|d| d.id == tx.object_id));
            if owner.id == target && !listed {
                return true;
            }
        }
    }
    false
}

/// Patches an update or mixin transaction into lookup data.
///
/// `current` is the updated document as it is after `tx`, when it was
/// fetched; it is listed under reverse lookups the document was attached
/// to. Returns true if any result document changed.
pub fn patch_updated(docs: &mut [Doc], ways: &[LookupWay], tx: &Tx, current: Option<&Doc>) -> bool {
    let mut changed = false;
    for way in ways {
        for result in docs.iter_mut() {
            let Some(owner) = lookup_owner_mut(result, &way.path) else {
                continue;
            };
            match &way.reverse_key {
                Some(attach_key) => {
                    let owner_id = owner.id.clone();
                    let target = reattached_to(tx, attach_key);
                    let Some(LookupValue::Many(items)) = owner.lookup.get_mut(&way.key) else {
                        continue;
                    };
                    let index = items.iter().position(|d| d.id == tx.object_id);
                    match (index, target) {
                        (Some(i), Some(to)) if to.as_str() != Some(owner_id.as_str()) => {
                            items.remove(i);
                            changed = true;
                        }
                        (Some(i), _) => {
                            if items[i].modified_on < tx.modified_on {
                                changed |= apply_tx(&mut items[i], tx);
                            }
                        }
                        (None, Some(to)) if to.as_str() == Some(owner_id.as_str()) => {
                            if let Some(doc) = current {
                                insert_by_id(items, doc.without_lookup());
                                changed = true;
                            }
                        }
                        (None, _) => {}
                    }
                }
                None => {
                    if !field_is(owner, &way.key, &tx.object_id) {
                        continue;
                    }
                    if let Some(LookupValue::One(Some(target))) = owner.lookup.get_mut(&way.key) {
                        if target.modified_on < tx.modified_on {
                            changed |= apply_tx(target, tx);
                        }
                    }
                }
            }
        }
    }
    changed
}

/// Removes a deleted document from lookup data. Returns true if any result
/// document changed.
pub fn patch_removed(docs: &mut [Doc], ways: &[LookupWay], id: &str) -> bool {
    let mut changed = false;
    for way in ways {
        for result in docs.iter_mut() {
            let Some(owner) = lookup_owner_mut(result, &way.path) else {
                continue;
            };
            match owner.lookup.get_mut(&way.key) {
                Some(LookupValue::Many(items)) => {
                    let before = items.len();
                    items.retain(|d| d.id != id);
                    changed |= items.len() != before;
                }
                Some(LookupValue::One(target)) => {
                    if target.as_ref().map_or(false, |d| d.id == id) {
                        *target = None;
                        changed = true;
                    }
                }
                None => {}
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedoc_core::{class, Classifier, DocumentUpdate, TxFactory};

    const ISSUE: &str = "tracker:class:Issue";
    const COMMENT: &str = "chunter:class:Comment";

    fn make_hierarchy() -> Hierarchy {
        let mut h = Hierarchy::with_genesis();
        h.add_classifier(Classifier::class(ISSUE).extending(class::DOC).in_domain("tracker"));
        h.add_classifier(Classifier::class(COMMENT).extending(class::ATTACHED_DOC).in_domain("chunter"));
        h
    }

    fn make_lookup() -> Lookup {
        Lookup::new()
            .forward("space", class::SPACE)
            .reverse("comments", COMMENT, "attachedTo")
    }

    fn issue(id: &str) -> Doc {
        let mut doc = Doc::new(id, ISSUE, "sp1", 1, "u").with("space", "sp1");
        doc.space = "sp1".into();
        doc.lookup.insert(
            "space".into(),
            LookupValue::One(Some(Box::new(Doc::new("sp1", class::SPACE, "sp1", 1, "u").with("name", "old")))),
        );
        doc.lookup.insert("comments".into(), LookupValue::Many(Vec::new()));
        doc
    }

    fn comment(id: &str, attached_to: &str) -> Doc {
        Doc::new(id, COMMENT, "sp1", 2, "u").with("attachedTo", attached_to)
    }

    #[test]
    fn test_ways_by_class() {
        let h = make_hierarchy();
        let lookup = make_lookup();
        let ways = lookup_ways(&h, &lookup, COMMENT);
        assert_eq!(ways.len(), 1);
        assert_eq!(ways[0].key, "comments");
        assert_eq!(ways[0].reverse_key.as_deref(), Some("attachedTo"));

        let ways = lookup_ways(&h, &lookup, class::SPACE);
        assert_eq!(ways.len(), 1);
        assert!(!ways[0].is_reverse());
        assert!(lookup_ways(&h, &lookup, ISSUE).is_empty());
    }

    #[test]
    fn test_nested_ways() {
        let h = make_hierarchy();
        let lookup = Lookup::new().forward_nested("attachedTo", ISSUE, Lookup::new().forward("space", class::SPACE));
        let ways = lookup_ways(&h, &lookup, class::SPACE);
        assert_eq!(ways.len(), 1);
        assert_eq!(ways[0].path, vec!["attachedTo".to_string()]);
        assert_eq!(ways[0].key, "space");
    }

    #[test]
    fn test_memo() {
        let h = make_hierarchy();
        let mut memo = LookupWays::new();
        let a = memo.get(&h, &make_lookup(), COMMENT);
        let b = memo.get(&h, &make_lookup(), COMMENT);
        assert!(Rc::ptr_eq(&a, &b));
        memo.clear();
        let c = memo.get(&h, &make_lookup(), COMMENT);
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_patch_added_reverse() {
        let h = make_hierarchy();
        let ways = lookup_ways(&h, &make_lookup(), COMMENT);
        let mut docs = vec![issue("i1"), issue("i2")];
        let c = comment("c1", "i2");
        assert!(patch_added(&mut docs, &ways, &[c.clone()]));
        assert!(!patch_added(&mut docs, &ways, &[c]));
        assert_eq!(docs[0].lookup["comments"].as_many().unwrap().len(), 0);
        assert_eq!(docs[1].lookup["comments"].as_many().unwrap()[0].id, "c1");
    }

    #[test]
    fn test_patch_updated_forward() {
        let h = make_hierarchy();
        let ways = lookup_ways(&h, &make_lookup(), class::SPACE);
        let mut docs = vec![issue("i1")];
        let f = TxFactory::new("u", 10);
        let tx = f.update_doc(class::SPACE, "sp1", "sp1", DocumentUpdate::new().set("name", "new"));
        assert!(patch_updated(&mut docs, &ways, &tx, None));
        let space = docs[0].lookup["space"].as_one().unwrap();
        assert_eq!(space.get("name").unwrap().as_ref(), "new");
    }

    #[test]
    fn test_patch_updated_reattach() {
        let h = make_hierarchy();
        let ways = lookup_ways(&h, &make_lookup(), COMMENT);
        let mut docs = vec![issue("i1"), issue("i2")];
        patch_added(&mut docs, &ways, &[comment("c1", "i1")]);

        let f = TxFactory::new("u", 10);
        let tx = f.update_doc(COMMENT, "sp1", "c1", DocumentUpdate::new().set("attachedTo", "i2"));
        assert!(update_needs_document(&docs, &ways, &tx));
        let moved = comment("c1", "i2");
        assert!(patch_updated(&mut docs, &ways, &tx, Some(&moved)));
        assert!(docs[0].lookup["comments"].as_many().unwrap().is_empty());
        assert_eq!(docs[1].lookup["comments"].as_many().unwrap()[0].id, "c1");
    }

    #[test]
    fn test_patch_removed() {
        let h = make_hierarchy();
        let mut docs = vec![issue("i1")];
        let comment_ways = lookup_ways(&h, &make_lookup(), COMMENT);
        patch_added(&mut docs, &comment_ways, &[comment("c1", "i1")]);
        assert!(patch_removed(&mut docs, &comment_ways, "c1"));
        assert!(docs[0].lookup["comments"].as_many().unwrap().is_empty());

        let space_ways = lookup_ways(&h, &make_lookup(), class::SPACE);
        assert!(patch_removed(&mut docs, &space_ways, "sp1"));
        assert!(docs[0].lookup["space"].as_one().is_none());
        assert!(!patch_removed(&mut docs, &space_ways, "sp1"));
    }
}
