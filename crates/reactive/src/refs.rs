//! Cross-query document cache.
//!
//! `DocumentRefs` remembers every document currently held by a live query,
//! keyed by the document class and the lookup shape it was resolved with.
//! Single-document reads are answered from here without a backing store
//! round trip. An entry lives exactly as long as at least one query holds
//! the document.

use crate::live_query::QueryId;
use hashbrown::{HashMap, HashSet};
use livedoc_core::{Doc, Hierarchy, Ref, Timestamp};
use livedoc_query::{DocumentMatcher, DocumentQuery, FindOptions, FindResult, Lookup};

/// A cached document and the queries that hold it.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub doc: Doc,
    pub queries: Vec<QueryId>,
    pub last_used: Timestamp,
}

/// Returns the cache key for documents of `class` resolved with `lookup`.
pub fn class_key(class: &str, lookup: Option<&Lookup>) -> String {
    let shape = lookup.map_or_else(|| "{}".to_string(), Lookup::shape_key);
    format!("{}:{}", class, shape)
}

/// Documents shared between live queries.
#[derive(Debug, Default)]
pub struct DocumentRefs {
    /// Class key -> document id -> entry.
    docs: HashMap<String, HashMap<Ref, DocumentRef>>,
    /// Query -> the `(class key, id)` pairs it currently holds.
    held: HashMap<QueryId, HashSet<(String, Ref)>>,
}

impl DocumentRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that query `qid` now holds exactly `docs`.
    ///
    /// Documents the query no longer holds are released; an entry whose
    /// last query is gone is dropped. A held document is replaced unless the
    /// cached copy is newer.
    pub fn update(&mut self, qid: QueryId, lookup: Option<&Lookup>, docs: &[Doc]) {
        let shape = lookup.map_or_else(|| "{}".to_string(), Lookup::shape_key);
        let mut now: HashSet<(String, Ref)> = HashSet::with_capacity(docs.len());
        for doc in docs {
            let key = format!("{}:{}", doc.class, shape);
            let entries = self.docs.entry(key.clone()).or_default();
            match entries.get_mut(&doc.id) {
                Some(entry) => {
                    if !entry.queries.contains(&qid) {
                        entry.queries.push(qid);
                    }
                    if entry.last_used <= doc.modified_on {
                        entry.doc = doc.clone();
                        entry.last_used = doc.modified_on;
                    }
                }
                None => {
                    entries.insert(
                        doc.id.clone(),
                        DocumentRef {
                            doc: doc.clone(),
                            queries: vec![qid],
                            last_used: doc.modified_on,
                        },
                    );
                }
            }
            now.insert((key, doc.id.clone()));
        }

        let before = self.held.insert(qid, now).unwrap_or_default();
        let current = &self.held[&qid];
        let stale: Vec<_> = before.difference(current).cloned().collect();
        for (key, id) in stale {
            self.release_one(qid, &key, &id);
        }
        if self.held.get(&qid).map_or(false, HashSet::is_empty) {
            self.held.remove(&qid);
        }
    }

    /// Releases every document held by `qid`.
    pub fn release(&mut self, qid: QueryId) {
        let Some(held) = self.held.remove(&qid) else {
            return;
        };
        for (key, id) in held {
            self.release_one(qid, &key, &id);
        }
    }

    fn release_one(&mut self, qid: QueryId, key: &str, id: &str) {
        let Some(entries) = self.docs.get_mut(key) else {
            return;
        };
        if let Some(entry) = entries.get_mut(id) {
            entry.queries.retain(|q| *q != qid);
            if entry.queries.is_empty() {
                entries.remove(id);
            }
        }
        if entries.is_empty() {
            self.docs.remove(key);
        }
    }

    pub fn get(&self, class: &str, lookup: Option<&Lookup>, id: &str) -> Option<&DocumentRef> {
        self.docs.get(&class_key(class, lookup))?.get(id)
    }

    /// Answers a one-document read from the cache.
    ///
    /// Handles `{_id: <string>}` queries and `limit: 1` reads without sort,
    /// total or projection. Returns `None` when the cache cannot answer.
    pub fn find(
        &self,
        hierarchy: &Hierarchy,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> Option<FindResult> {
        let entries = self.docs.get(&class_key(class, options.active_lookup()))?;
        let matcher = DocumentMatcher::new(class, query).ok()?;
        if let Some(id) = query.single_id() {
            if let Some(entry) = entries.get(id) {
                if matcher.matches(hierarchy, &entry.doc) {
                    return Some(FindResult::new(vec![entry.doc.clone()], Some(1)));
                }
            }
        }
        let single = options.limit == Some(1)
            && !options.total
            && options.sort.is_empty()
            && options.projection.is_none();
        if single {
            let mut matching: Vec<&Doc> = entries
                .values()
                .map(|e| &e.doc)
                .filter(|d| matcher.matches(hierarchy, d))
                .collect();
            matching.sort_by(|a, b| a.id.cmp(&b.id));
            if let Some(doc) = matching.first() {
                return Some(FindResult::new(vec![(*doc).clone()], Some(1)));
            }
        }
        None
    }

    /// Number of cached documents.
    pub fn len(&self) -> usize {
        self.docs.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn clear(&mut self) {
        self.docs.clear();
        self.held.clear();
    }
}
