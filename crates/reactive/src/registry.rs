//! Query registry.
//!
//! `QueryRegistry` owns every live query, indexes them by equivalence key and
//! by class, and keeps the dormant ones (no subscribers left) in LRU order so
//! they can be reused or evicted.

use crate::config::EngineConfig;
use crate::live_query::{LiveQuery, QueryId};
use hashbrown::HashMap;
use livedoc_core::Ref;
use lru::LruCache;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Shared handle to a registered query.
pub type QueryRef = Rc<RefCell<LiveQuery>>;

/// Tracks live queries and the dormant queue.
pub struct QueryRegistry {
    /// Query ID -> query, in registration order.
    queries: BTreeMap<QueryId, QueryRef>,
    /// Equivalence key -> query ID.
    by_key: HashMap<String, QueryId>,
    /// Query class -> query IDs.
    by_class: HashMap<Ref, BTreeSet<QueryId>>,
    /// Queries resolving lookups, which can be affected by any class.
    with_lookup: BTreeSet<QueryId>,
    /// Dormant queries, least recently used first.
    dormant: LruCache<QueryId, ()>,
    next_id: QueryId,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self {
            queries: BTreeMap::new(),
            by_key: HashMap::new(),
            by_class: HashMap::new(),
            with_lookup: BTreeSet::new(),
            dormant: LruCache::unbounded(),
            next_id: 1,
        }
    }

    /// Reserves the next query ID.
    pub fn next_id(&mut self) -> QueryId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers a query. An older query with the same key is replaced in the
    /// key index.
    pub fn register(&mut self, query: QueryRef) -> QueryId {
        let (id, key, class, lookup) = {
            let q = query.borrow();
            (q.id, q.key.clone(), q.class.clone(), q.options.active_lookup().is_some())
        };
        self.by_key.insert(key, id);
        self.by_class.entry(class).or_default().insert(id);
        if lookup {
            self.with_lookup.insert(id);
        }
        self.queries.insert(id, query);
        id
    }

    pub fn get(&self, id: QueryId) -> Option<QueryRef> {
        self.queries.get(&id).cloned()
    }

    /// Finds the registered query with the given equivalence key.
    pub fn find_equivalent(&self, key: &str) -> Option<QueryRef> {
        self.by_key.get(key).and_then(|id| self.get(*id))
    }

    pub fn ids(&self) -> Vec<QueryId> {
        self.queries.keys().copied().collect()
    }

    /// Classes that have at least one registered query.
    pub fn classes(&self) -> Vec<Ref> {
        self.by_class.keys().cloned().collect()
    }

    /// IDs of the queries over any of `classes` together with every query
    /// that resolves lookups, in registration order.
    pub fn ids_for<'a>(&self, classes: impl IntoIterator<Item = &'a str>) -> Vec<QueryId> {
        let mut ids = self.with_lookup.clone();
        for class in classes {
            if let Some(set) = self.by_class.get(class) {
                ids.extend(set.iter().copied());
            }
        }
        ids.into_iter().collect()
    }

    /// Moves a query to the most recently used end of the dormant queue.
    pub fn make_dormant(&mut self, id: QueryId) {
        if self.queries.contains_key(&id) {
            self.dormant.put(id, ());
        }
    }

    /// Takes a query out of the dormant queue. Returns true if it was dormant.
    pub fn wake(&mut self, id: QueryId) -> bool {
        self.dormant.pop(&id).is_some()
    }

    /// Removes the least recently used dormant queries once the queue holds
    /// more than the configured capacity, returning them.
    pub fn evict_overflow(&mut self, config: &EngineConfig) -> Vec<QueryRef> {
        let batch = config.eviction_batch(self.dormant.len());
        let mut evicted = Vec::with_capacity(batch);
        for _ in 0..batch {
            let Some((id, ())) = self.dormant.pop_lru() else {
                break;
            };
            if let Some(query) = self.remove(id) {
                evicted.push(query);
            }
        }
        evicted
    }

    /// Removes every dormant query.
    pub fn drain_dormant(&mut self) -> Vec<QueryRef> {
        let mut drained = Vec::with_capacity(self.dormant.len());
        while let Some((id, ())) = self.dormant.pop_lru() {
            if let Some(query) = self.remove(id) {
                drained.push(query);
            }
        }
        drained
    }

    /// Unregisters a query.
    pub fn remove(&mut self, id: QueryId) -> Option<QueryRef> {
        let query = self.queries.remove(&id)?;
        self.dormant.pop(&id);
        self.with_lookup.remove(&id);
        let (key, class) = {
            let q = query.borrow();
            (q.key.clone(), q.class.clone())
        };
        if self.by_key.get(&key) == Some(&id) {
            self.by_key.remove(&key);
        }
        if let Some(set) = self.by_class.get_mut(&class) {
            set.remove(&id);
            if set.is_empty() {
                self.by_class.remove(&class);
            }
        }
        Some(query)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn dormant_len(&self) -> usize {
        self.dormant.len()
    }

    pub fn clear(&mut self) {
        self.queries.clear();
        self.by_key.clear();
        self.by_class.clear();
        self.with_lookup.clear();
        self.dormant.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_query::ResultSlot;
    use livedoc_query::{DocumentQuery, FindOptions, Lookup};

    fn make_query(registry: &mut QueryRegistry, name: &str) -> QueryRef {
        let id = registry.next_id();
        let query = LiveQuery::new(
            id,
            "task:class:Task",
            DocumentQuery::new().with("name", name),
            FindOptions::new(),
            ResultSlot::Ready(Vec::new()),
        )
        .unwrap();
        let query = Rc::new(RefCell::new(query));
        registry.register(Rc::clone(&query));
        query
    }

    #[test]
    fn test_register_and_find_equivalent() {
        let mut registry = QueryRegistry::new();
        let q = make_query(&mut registry, "a");
        let key = q.borrow().key.clone();
        let found = registry.find_equivalent(&key).unwrap();
        assert!(Rc::ptr_eq(&found, &q));
        assert!(registry.find_equivalent("nope").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_clears_key() {
        let mut registry = QueryRegistry::new();
        let q = make_query(&mut registry, "a");
        let (id, key) = (q.borrow().id, q.borrow().key.clone());
        registry.make_dormant(id);
        assert!(registry.remove(id).is_some());
        assert!(registry.find_equivalent(&key).is_none());
        assert_eq!(registry.dormant_len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wake() {
        let mut registry = QueryRegistry::new();
        let id = make_query(&mut registry, "a").borrow().id;
        registry.make_dormant(id);
        assert_eq!(registry.dormant_len(), 1);
        assert!(registry.wake(id));
        assert_eq!(registry.dormant_len(), 0);
        assert!(!registry.wake(id));
    }

    #[test]
    fn test_evict_overflow_lru_order() {
        let mut registry = QueryRegistry::new();
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| make_query(&mut registry, n).borrow().id)
            .collect();
        for id in &ids {
            registry.make_dormant(*id);
        }
        // Parking again counts as a use.
        registry.make_dormant(ids[0]);

        let config = EngineConfig::default().with_dormant_capacity(2);
        let evicted = registry.evict_overflow(&config);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].borrow().id, ids[1]);
        assert_eq!(registry.ids(), vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_evict_never_touches_active() {
        let mut registry = QueryRegistry::new();
        let active = make_query(&mut registry, "a").borrow().id;
        let dormant = make_query(&mut registry, "b").borrow().id;
        registry.make_dormant(dormant);

        let config = EngineConfig::default().with_dormant_capacity(0);
        registry.evict_overflow(&config);
        assert_eq!(registry.ids(), vec![active]);
    }

    #[test]
    fn test_class_index() {
        let mut registry = QueryRegistry::new();
        let a = make_query(&mut registry, "a").borrow().id;
        let id = registry.next_id();
        let options = FindOptions::new().with_lookup(Lookup::new().forward("space", "core:class:Space"));
        let comment = LiveQuery::new(id, "chunter:class:Comment", DocumentQuery::new(), options, ResultSlot::Ready(Vec::new()))
            .unwrap();
        registry.register(Rc::new(RefCell::new(comment)));
        let other = registry.next_id();
        let other_query = LiveQuery::new(
            other,
            "chunter:class:Message",
            DocumentQuery::new(),
            FindOptions::new(),
            ResultSlot::Ready(Vec::new()),
        )
        .unwrap();
        registry.register(Rc::new(RefCell::new(other_query)));

        assert_eq!(registry.classes().len(), 3);
        assert_eq!(registry.ids_for(["task:class:Task"]), vec![a, id]);
        assert_eq!(registry.ids_for(["chunter:class:Message"]), vec![id, other]);

        registry.remove(id);
        assert_eq!(registry.ids_for(["task:class:Task"]), vec![a]);
        registry.remove(a);
        assert_eq!(registry.classes(), vec!["chunter:class:Message".to_string()]);
    }

    #[test]
    fn test_drain_dormant() {
        let mut registry = QueryRegistry::new();
        let a = make_query(&mut registry, "a").borrow().id;
        let b = make_query(&mut registry, "b").borrow().id;
        registry.make_dormant(b);
        assert_eq!(registry.drain_dormant().len(), 1);
        assert_eq!(registry.ids(), vec![a]);
    }
}
