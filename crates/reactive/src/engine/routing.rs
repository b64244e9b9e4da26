//! Transaction routing.
//!
//! Every committed transaction is offered to every registered query. The
//! handlers below patch the cached result in place when the outcome is
//! provable from the transaction and the cached documents, fetch the one
//! affected document when it is not, and fall back to a full refresh when a
//! limited window may have to pull in documents it has never seen.

use super::Engine;
use crate::live_query::{LiveQuery, QueryId};
use crate::lookup::{patch_added, patch_removed, patch_updated, update_needs_document};
use crate::refs::class_key;
use hashbrown::HashMap;
use livedoc_core::apply::{apply_tx, apply_update};
use livedoc_core::doc::field;
use livedoc_core::{class, ClassifierKind, Doc, DocumentUpdate, Hierarchy, LookupValue, Result, Tx, TxBody};
use livedoc_query::{DocumentQuery, FindOptions, Lookup};
use serde_json::Value;
use tracing::{trace, warn};

/// Documents fetched while processing one batch, keyed by id, class and
/// lookup shape.
pub(super) type DocCache = HashMap<String, Option<Doc>>;

/// Result of re-checking an updated document that is in the result.
enum Outcome {
    Replaced,
    Removed,
    Refresh,
    Gone,
}

/// Returns true if writing `key` can change the value at `path`.
fn overlaps(key: &str, path: &str) -> bool {
    key == path || is_prefix(key, path) || is_prefix(path, key)
}

fn is_prefix(parent: &str, path: &str) -> bool {
    path.len() > parent.len() && path.starts_with(parent) && path.as_bytes()[parent.len()] == b'.'
}

/// Header fields every update rewrites.
fn is_rewritten_header(path: &str) -> bool {
    path == field::MODIFIED_ON || path == field::MODIFIED_BY
}

/// Header fields that keep their stored value unless an update sets them.
fn is_fixed_header(path: &str) -> bool {
    path == field::ID || path == field::CLASS || path == field::SPACE
}

/// Builds a document carrying only the header of `tx` and the values its
/// plain overwrites write.
fn stub_doc(tx: &Tx, ops: &DocumentUpdate) -> Doc {
    let mut stub = Doc::new(
        tx.object_id.clone(),
        tx.object_class.clone(),
        tx.object_space.clone(),
        tx.modified_on,
        tx.modified_by.clone(),
    );
    let mut sets = DocumentUpdate::new();
    for (path, value) in ops.sets() {
        sets = sets.set(path, value.clone());
    }
    apply_update(&mut stub, &sets);
    stub
}

impl Engine {
    pub(super) async fn route(&self, tx: &Tx, cache: &mut DocCache) {
        if Hierarchy::is_schema_class(&tx.object_class) {
            let applied = self.inner.hierarchy.borrow_mut().tx(tx);
            if let Err(error) = applied {
                warn!(tx = %tx.id, %error, "schema transaction not applied");
            }
            self.inner.ways.borrow_mut().clear();
        }

        let ids = self.routed_queries(&tx.object_class);
        trace!(tx = %tx.id, queries = ids.len(), "routing transaction");
        for qid in ids {
            if self.inner.closed.get() {
                return;
            }
            if !matches!(self.ensure_ready(qid).await, Ok(true)) {
                continue;
            }
            let Some(query) = self.query_ref(qid) else {
                continue;
            };
            let (class, refreshing, has_lookup) = {
                let q = query.borrow();
                (q.class.clone(), q.refreshing, q.options.active_lookup().is_some())
            };

            if self.is_tx_query(&class) {
                self.handle_add(qid, tx.to_doc(), true).await;
                continue;
            }
            if refreshing && (has_lookup || self.is_related(&class, &tx.object_class)) {
                self.refresh(qid).await;
                continue;
            }

            match &tx.body {
                TxBody::CreateDoc { .. } => {
                    if let Some(doc) = tx.create_doc() {
                        self.handle_add(qid, doc.clone(), true).await;
                        self.handle_add_lookup(qid, &doc).await;
                    }
                }
                TxBody::UpdateDoc { operations } => self.handle_update(qid, tx, operations, cache).await,
                TxBody::Mixin { mixin, attributes } => {
                    self.handle_mixin(qid, tx, mixin, attributes, cache).await
                }
                TxBody::RemoveDoc => self.handle_remove(qid, tx).await,
            }
        }
    }

    // ==================== Class relations ====================

    /// Queries a transaction on `object_class` can affect: those over a
    /// related class, transaction log queries and queries with lookups.
    fn routed_queries(&self, object_class: &str) -> Vec<QueryId> {
        let registry = self.inner.registry.borrow();
        let classes: Vec<_> = registry
            .classes()
            .into_iter()
            .filter(|c| self.is_tx_query(c) || self.is_related(c, object_class))
            .collect();
        registry.ids_for(classes.iter().map(String::as_str))
    }

    fn is_tx_query(&self, class: &str) -> bool {
        let h = self.hierarchy();
        h.is_derived(&h.class_or_base(class), class::TX)
    }

    /// Returns true if documents of `object_class` can belong to a query on
    /// `query_class`.
    fn is_related(&self, query_class: &str, object_class: &str) -> bool {
        let h = self.hierarchy();
        match h.get_class(query_class).map(|c| c.kind) {
            Ok(ClassifierKind::Interface) => h.is_implements(object_class, query_class),
            Ok(_) => h.is_derived(object_class, &h.class_or_base(query_class)),
            Err(_) => query_class == object_class,
        }
    }

    fn query_lookup(&self, qid: QueryId) -> Option<Lookup> {
        let query = self.query_ref(qid)?;
        let q = query.borrow();
        q.options.active_lookup().cloned()
    }

    fn cached_doc(&self, qid: QueryId, id: &str) -> Option<Doc> {
        let query = self.query_ref(qid)?;
        let q = query.borrow();
        q.docs()?.iter().find(|d| d.id == id).cloned()
    }

    // ==================== Lookups ====================

    /// Resolves the `$lookup` entries of `doc` through the engine's own
    /// read path. Failures leave empty entries.
    async fn resolve_lookup(&self, doc: &mut Doc, lookup: &Lookup) {
        for (key, target) in &lookup.forward {
            let id = doc.get(key).as_deref().and_then(Value::as_str).map(str::to_string);
            let found = match id {
                Some(id) => {
                    let mut options = FindOptions::new();
                    if let Some(nested) = &target.nested {
                        options = options.with_lookup((**nested).clone());
                    }
                    match self.find_one(&target.class, &DocumentQuery::by_id(&id), &options).await {
                        Ok(found) => found,
                        Err(error) => {
                            warn!(doc = %doc.id, key = %key, %error, "lookup not resolved");
                            None
                        }
                    }
                }
                None => None,
            };
            doc.lookup.insert(key.clone(), LookupValue::One(found.map(Box::new)));
        }
        for (key, reverse) in &lookup.reverse {
            let query = DocumentQuery::new().with(&reverse.attach_key, doc.id.clone());
            let found = match self.find_all(&reverse.class, &query, &FindOptions::new()).await {
                Ok(result) => result.docs,
                Err(error) => {
                    warn!(doc = %doc.id, key = %key, %error, "reverse lookup not resolved");
                    Vec::new()
                }
            };
            doc.lookup.insert(key.clone(), LookupValue::Many(found));
        }
    }

    /// Re-resolves the forward lookups whose key `ops` overwrites.
    async fn refresh_forward_lookups(&self, doc: &mut Doc, lookup: &Lookup, ops: &DocumentUpdate) {
        let mut touched = Lookup::new();
        touched.forward = lookup
            .forward
            .iter()
            .filter(|(key, _)| ops.sets().any(|(path, _)| path == key.as_str()))
            .map(|(key, target)| (key.clone(), target.clone()))
            .collect();
        if !touched.forward.is_empty() {
            self.resolve_lookup(doc, &touched).await;
        }
    }

    /// Runs `patch` over the cached result and re-sorts it if anything
    /// changed.
    fn patch_query(&self, qid: QueryId, patch: impl FnOnce(&mut [Doc]) -> bool) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let changed = {
            let mut q = query.borrow_mut();
            let changed = q.docs_mut().map_or(false, |docs| patch(docs.as_mut_slice()));
            if changed {
                let h = self.hierarchy();
                q.resort(&h);
            }
            changed
        };
        if changed {
            self.mark_changed(qid);
        }
    }

    /// Places a created document into the lookup data of the result.
    async fn handle_add_lookup(&self, qid: QueryId, doc: &Doc) {
        let Some(lookup) = self.query_lookup(qid) else {
            return;
        };
        let ways = self.lookup_ways(&lookup, &doc.class);
        if ways.is_empty() {
            return;
        }
        let mut placed = Vec::with_capacity(ways.len());
        for way in ways.iter() {
            let mut item = doc.without_lookup();
            if let Some(nested) = &way.nested {
                self.resolve_lookup(&mut item, nested).await;
            }
            placed.push(item);
        }
        self.patch_query(qid, |docs| patch_added(docs, &ways, &placed));
    }

    async fn handle_update_lookup(&self, qid: QueryId, tx: &Tx) {
        let Some(lookup) = self.query_lookup(qid) else {
            return;
        };
        let ways = self.lookup_ways(&lookup, &tx.object_class);
        if ways.is_empty() {
            return;
        }
        let needs_document = self
            .query_ref(qid)
            .map_or(false, |q| q.borrow().docs().map_or(false, |docs| update_needs_document(docs, &ways, tx)));
        let current = if needs_document {
            let fetched = self
                .inner
                .store
                .find_one(&tx.object_class, &DocumentQuery::by_id(&tx.object_id), &FindOptions::new())
                .await;
            match fetched {
                Ok(doc) => doc,
                Err(error) => {
                    warn!(tx = %tx.id, %error, "could not fetch reattached document");
                    None
                }
            }
        } else {
            None
        };
        self.patch_query(qid, |docs| patch_updated(docs, &ways, tx, current.as_ref()));
    }

    // ==================== Create ====================

    /// Inserts `doc` into the result if it matches.
    ///
    /// With `handle_lookup`, the document's lookups are resolved before the
    /// `$lookup.` part of the predicate is checked.
    async fn handle_add(&self, qid: QueryId, doc: Doc, handle_lookup: bool) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let lookup = query.borrow().options.active_lookup().cloned();
        let resolve = handle_lookup && lookup.is_some();
        let matched = {
            let q = query.borrow();
            let h = self.hierarchy();
            if resolve {
                q.matcher.matches_skip_lookup(&h, &doc)
            } else {
                q.matcher.matches(&h, &doc)
            }
        };
        if !matched {
            return;
        }
        let mut doc = doc;
        if let (true, Some(lookup)) = (resolve, &lookup) {
            self.resolve_lookup(&mut doc, lookup).await;
            let still = query.borrow().matcher.matches(&self.hierarchy(), &doc);
            if !still {
                return;
            }
        }
        self.insert_added(qid, doc);
    }

    fn insert_added(&self, qid: QueryId, mut doc: Doc) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let changed = {
            let mut q = query.borrow_mut();
            if q.position(&doc.id).is_some() {
                return;
            }
            if let Some(fields) = &q.options.projection {
                doc.project(fields);
            }
            let id = doc.id.clone();
            let h = self.hierarchy();
            q.insert_sorted(&h, doc);
            q.increment_total();
            let limit = q.options.limit;
            match limit {
                Some(limit) if q.docs().map_or(0, <[Doc]>::len) > limit => {
                    let popped = q.docs_mut().and_then(Vec::pop);
                    popped.map_or(false, |p| p.id != id) || q.options.total
                }
                _ => true,
            }
        };
        if changed {
            self.mark_changed(qid);
        }
    }

    // ==================== Update ====================

    async fn handle_update(&self, qid: QueryId, tx: &Tx, ops: &DocumentUpdate, cache: &mut DocCache) {
        match self.cached_doc(qid, &tx.object_id) {
            Some(stored) => self.update_in_result(qid, tx, ops, stored, cache).await,
            None => self.update_outside_result(qid, tx, ops, cache).await,
        }
        self.handle_update_lookup(qid, tx).await;
    }

    /// Fetches the current state of `id` once per batch.
    async fn current_doc(
        &self,
        class: &str,
        lookup: Option<&Lookup>,
        id: &str,
        cache: &mut DocCache,
    ) -> Result<Option<Doc>> {
        let key = format!("{}@{}", id, class_key(class, lookup));
        if let Some(doc) = cache.get(&key) {
            return Ok(doc.clone());
        }
        let mut options = FindOptions::new();
        if let Some(lookup) = lookup {
            options = options.with_lookup(lookup.clone());
        }
        let doc = self
            .inner
            .store
            .find_one(class, &DocumentQuery::by_id(id), &options)
            .await?;
        cache.insert(key, doc.clone());
        Ok(doc)
    }

    async fn update_in_result(
        &self,
        qid: QueryId,
        tx: &Tx,
        ops: &DocumentUpdate,
        stored: Doc,
        cache: &mut DocCache,
    ) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let (class, lookup, projected) = {
            let q = query.borrow();
            (q.class.clone(), q.options.active_lookup().cloned(), q.options.projection.is_some())
        };

        let updated = if projected {
            match self.current_doc(&class, lookup.as_ref(), &tx.object_id, cache).await {
                Ok(doc) => doc,
                Err(error) => {
                    warn!(query = qid, tx = %tx.id, %error, "could not fetch updated document");
                    return;
                }
            }
        } else {
            if stored.modified_on >= tx.modified_on {
                return;
            }
            let mut doc = stored;
            apply_tx(&mut doc, tx);
            if let Some(lookup) = &lookup {
                self.refresh_forward_lookups(&mut doc, lookup, ops).await;
            }
            Some(doc)
        };

        let outcome = {
            let mut q = query.borrow_mut();
            let h = self.hierarchy();
            let matched = updated.filter(|d| q.matcher.matches(&h, d));
            match matched {
                Some(mut doc) => {
                    if let Some(fields) = &q.options.projection {
                        doc.project(fields);
                    }
                    let slot = q
                        .docs_mut()
                        .and_then(|docs| docs.iter_mut().find(|d| d.id == doc.id));
                    match slot {
                        Some(slot) => {
                            *slot = doc;
                            Outcome::Replaced
                        }
                        None => Outcome::Gone,
                    }
                }
                None if q.is_full() => Outcome::Refresh,
                None => {
                    q.remove_doc(&tx.object_id);
                    Outcome::Removed
                }
            }
        };

        match outcome {
            Outcome::Replaced => self.after_update(qid, &tx.object_id, ops).await,
            Outcome::Removed => self.mark_changed(qid),
            Outcome::Refresh => self.refresh(qid).await,
            Outcome::Gone => {}
        }
    }

    /// Re-sorts after an in-place update and settles the window.
    ///
    /// A full window whose updated document sorts last is re-fetched: a
    /// document outside the window may now precede it.
    async fn after_update(&self, qid: QueryId, id: &str, ops: &DocumentUpdate) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let at_tail = {
            let mut q = query.borrow_mut();
            if q.needs_sort(|f| ops.touches(f)) {
                let h = self.hierarchy();
                q.resort(&h);
                q.is_full() && q.docs().and_then(<[Doc]>::last).map_or(false, |d| d.id == id)
            } else {
                false
            }
        };
        if at_tail {
            self.refresh(qid).await;
        } else {
            self.updated_doc_callback(qid, id).await;
        }
    }

    /// Trims a window that grew past its limit and notifies.
    async fn updated_doc_callback(&self, qid: QueryId, id: &str) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let refresh = {
            let mut q = query.borrow_mut();
            let limit = q.options.limit;
            match (limit, q.docs_mut()) {
                (Some(limit), Some(docs)) if docs.len() > limit => {
                    if docs[limit].id == id || !docs.iter().any(|d| d.id == id) {
                        true
                    } else {
                        docs.truncate(limit);
                        false
                    }
                }
                _ => false,
            }
        };
        if refresh {
            self.refresh(qid).await;
        } else {
            self.mark_changed(qid);
        }
    }

    /// Decides whether an update can move a document that is not in the
    /// result into it.
    ///
    /// A predicate field fully covered by a plain overwrite is evaluated on
    /// the written value; a definite miss rules the document out. Every
    /// update rewrites `modifiedOn` and `modifiedBy`, and unless written the
    /// id, class and space of the stub are those of the stored document, so
    /// header fields are evaluated the same way. Any other write overlapping
    /// a predicate field makes it a candidate.
    fn is_candidate(&self, q: &LiveQuery, tx: &Tx, ops: &DocumentUpdate) -> bool {
        let h = self.hierarchy();
        let exact = !h.is_mixin(&q.class);
        let stub = stub_doc(tx, ops);
        let mut candidate = false;
        for field in q.matcher.predicate().fields() {
            if field.path.starts_with("$lookup.") {
                continue;
            }
            let covered = ops
                .sets()
                .any(|(path, _)| path == field.path || is_prefix(path, &field.path));
            let rewritten = is_rewritten_header(&field.path);
            if rewritten || (is_fixed_header(&field.path) && !covered) {
                if exact && !field.eval(&stub) {
                    return false;
                }
                candidate |= rewritten;
                continue;
            }
            if covered && exact {
                if !field.eval(&stub) {
                    return false;
                }
                candidate = true;
            } else if covered || ops.keys().any(|k| overlaps(k, &field.path)) {
                candidate = true;
            }
        }
        candidate || (q.is_full() && q.needs_sort(|f| ops.touches(f)))
    }

    async fn update_outside_result(&self, qid: QueryId, tx: &Tx, ops: &DocumentUpdate, cache: &mut DocCache) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let (class, lookup, full, total) = {
            let q = query.borrow();
            (q.class.clone(), q.options.active_lookup().cloned(), q.is_full(), q.options.total)
        };
        if !self.is_related(&class, &tx.object_class) {
            return;
        }
        let candidate = self.is_candidate(&query.borrow(), tx, ops);
        if !candidate {
            if total && full {
                self.refresh(qid).await;
            }
            return;
        }
        if full {
            self.refresh(qid).await;
            return;
        }

        let doc = match self.current_doc(&class, lookup.as_ref(), &tx.object_id, cache).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return,
            Err(error) => {
                warn!(query = qid, tx = %tx.id, %error, "could not fetch updated document");
                return;
            }
        };
        let inserted = {
            let mut q = query.borrow_mut();
            let h = self.hierarchy();
            if q.position(&doc.id).is_some() || !q.matcher.matches(&h, &doc) {
                false
            } else {
                let mut doc = doc;
                if let Some(fields) = &q.options.projection {
                    doc.project(fields);
                }
                q.insert_sorted(&h, doc);
                q.increment_total();
                true
            }
        };
        if inserted {
            trace!(query = qid, doc = %tx.object_id, "update moved document into result");
            self.after_update(qid, &tx.object_id, ops).await;
        }
    }

    // ==================== Mixin ====================

    /// A mixin query can gain the document; so can a class query reading
    /// `modifiedOn` or `modifiedBy`, which every mixin rewrites.
    async fn handle_mixin(
        &self,
        qid: QueryId,
        tx: &Tx,
        mixin: &str,
        ops: &DocumentUpdate,
        cache: &mut DocCache,
    ) {
        if let Some(stored) = self.cached_doc(qid, &tx.object_id) {
            self.update_in_result(qid, tx, ops, stored, cache).await;
            self.handle_update_lookup(qid, tx).await;
            return;
        }
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let (class, filter, options, reads_header, full) = {
            let q = query.borrow();
            let reads_header = q.matcher.predicate().paths().any(is_rewritten_header);
            (q.class.clone(), q.query.clone(), q.options.clone(), reads_header, q.is_full())
        };
        let related = {
            let h = self.hierarchy();
            if h.is_mixin(&class) {
                h.is_derived(mixin, &class) || h.is_derived(&class, mixin)
            } else {
                reads_header && self.is_related(&class, &tx.object_class)
            }
        };
        if related && full {
            // The document may already match past the window.
            self.refresh(qid).await;
        } else if related {
            let filter = filter.with("_id", tx.object_id.clone());
            match self.inner.store.find_one(&class, &filter, &options).await {
                Ok(Some(doc)) => self.handle_add(qid, doc, false).await,
                Ok(None) => {}
                Err(error) => warn!(query = qid, tx = %tx.id, %error, "could not fetch mixin target"),
            }
        }
        self.handle_update_lookup(qid, tx).await;
    }

    // ==================== Remove ====================

    async fn handle_remove(&self, qid: QueryId, tx: &Tx) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let related = self.is_related(&query.borrow().class, &tx.object_class);
        enum Action {
            Refresh,
            Changed,
            Nothing,
        }
        let action = {
            let mut q = query.borrow_mut();
            if q.position(&tx.object_id).is_some() {
                if q.is_full() {
                    Action::Refresh
                } else {
                    q.remove_doc(&tx.object_id);
                    Action::Changed
                }
            } else if q.options.total && q.is_full() && related {
                Action::Refresh
            } else {
                Action::Nothing
            }
        };
        match action {
            Action::Refresh => self.refresh(qid).await,
            Action::Changed => self.mark_changed(qid),
            Action::Nothing => {}
        }

        if let Some(lookup) = self.query_lookup(qid) {
            let ways = self.lookup_ways(&lookup, &tx.object_class);
            if !ways.is_empty() {
                self.patch_query(qid, |docs| patch_removed(docs, &ways, &tx.object_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedoc_core::TxFactory;

    #[test]
    fn test_overlaps() {
        assert!(overlaps("a", "a"));
        assert!(overlaps("a", "a.b"));
        assert!(overlaps("a.b", "a"));
        assert!(!overlaps("a", "ab"));
        assert!(!overlaps("a.b", "a.c"));
    }

    #[test]
    fn test_header_field_kinds() {
        assert!(is_rewritten_header("modifiedBy"));
        assert!(is_rewritten_header("modifiedOn"));
        assert!(!is_rewritten_header("space"));
        assert!(is_fixed_header("space"));
        assert!(is_fixed_header("_id"));
        assert!(!is_fixed_header("name"));
    }

    #[test]
    fn test_stub_doc_carries_sets_only() {
        let f = TxFactory::new("u", 5);
        let ops = DocumentUpdate::new().set("status", "done").inc("rank", 1).set("space", "sp2");
        let tx = f.update_doc("task:class:Task", "sp1", "t1", ops.clone());
        let stub = stub_doc(&tx, &ops);
        assert_eq!(stub.id, "t1");
        assert_eq!(stub.space, "sp2");
        assert_eq!(stub.get("status").unwrap().as_ref(), "done");
        assert!(stub.get("rank").is_none());
    }
}
