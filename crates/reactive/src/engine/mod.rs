//! The live query engine.
//!
//! [`Engine`] keeps the results of registered queries consistent with the
//! backing store by applying committed transactions to the cached results
//! incrementally, and re-fetches a result only when it cannot prove the new
//! state locally.
//!
//! Execution is single-threaded. Backing store calls are the only suspension
//! points; no `RefCell` borrow is held across an `.await`, and positions
//! inside a result are looked up again after every suspension.
//!
//! Notifications are batched: changes made while a transaction batch is
//! being processed are delivered once per query when the batch completes.

mod routing;

use crate::config::EngineConfig;
use crate::live_query::{LiveQuery, QueryId, ResultSlot};
use crate::lookup::{LookupWay, LookupWays};
use crate::refs::DocumentRefs;
use crate::registry::{QueryRef, QueryRegistry};
use crate::subscription::{ResultCallback, SubscriptionId};
use futures::future::{self, FutureExt};
use livedoc_core::ids::domain;
use livedoc_core::{Doc, Error, Hierarchy, Result, Tx};
use livedoc_query::{equivalence_key, DocumentQuery, FindOptions, FindResult, Lookup};
use livedoc_storage::BackingStore;
use std::cell::{Cell, Ref, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

struct Inner {
    store: Rc<dyn BackingStore>,
    hierarchy: RefCell<Hierarchy>,
    registry: RefCell<QueryRegistry>,
    refs: RefCell<DocumentRefs>,
    ways: RefCell<LookupWays>,
    config: EngineConfig,
    closed: Cell<bool>,
    batch_depth: Cell<usize>,
    pending: RefCell<Vec<QueryId>>,
}

/// Client-side cache of live query results.
///
/// Cloning is cheap and yields a handle to the same engine.
///
/// ```
/// use futures::executor::block_on;
/// use livedoc_core::{class, Classifier, Hierarchy, TxFactory};
/// use livedoc_query::{DocumentQuery, FindOptions};
/// use livedoc_reactive::Engine;
/// use livedoc_storage::MemoryStore;
/// use serde_json::Map;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let engine = Engine::new(Rc::new(MemoryStore::new()), Hierarchy::with_genesis());
/// let factory = TxFactory::new("user", 1);
/// let task = Classifier::class("task:class:Task").extending(class::DOC).in_domain("task");
///
/// block_on(async {
///     engine
///         .submit(&factory.create_doc(class::CLASS, "core:space:Model", task.to_attributes(), Some("task:class:Task".into())))
///         .await
///         .unwrap();
///
///     let seen = Rc::new(RefCell::new(Vec::new()));
///     let sink = Rc::clone(&seen);
///     let handle = engine
///         .query("task:class:Task", &DocumentQuery::new(), &FindOptions::new(), move |r| {
///             sink.borrow_mut().push(r.len())
///         })
///         .await
///         .unwrap();
///
///     engine
///         .submit(&factory.create_doc("task:class:Task", "sp", Map::new(), None))
///         .await
///         .unwrap();
///     assert_eq!(*seen.borrow(), vec![0, 1]);
///     handle.unsubscribe();
/// });
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Rc<Inner>,
}

/// Handle returned by [`Engine::query`].
///
/// The subscription stays active until [`unsubscribe`](Self::unsubscribe)
/// is called; dropping the handle does not end it.
#[must_use = "the subscription can only be ended through this handle"]
pub struct Unsubscribe {
    engine: Weak<Inner>,
    query: QueryId,
    subscription: SubscriptionId,
}

impl Unsubscribe {
    /// The live query this subscription is attached to.
    pub fn query_id(&self) -> QueryId {
        self.query
    }

    /// Removes the callback. The query becomes dormant when its last
    /// callback is gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.engine.upgrade() {
            Engine { inner }.unsubscribe(self.query, self.subscription);
        }
    }
}

/// Defers notifications until the outermost batch ends.
struct Batch<'a> {
    engine: &'a Engine,
}

impl<'a> Batch<'a> {
    fn begin(engine: &'a Engine) -> Self {
        let depth = &engine.inner.batch_depth;
        depth.set(depth.get() + 1);
        Self { engine }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        let depth = &self.engine.inner.batch_depth;
        depth.set(depth.get().saturating_sub(1));
        if depth.get() == 0 {
            self.engine.flush();
        }
    }
}

impl Engine {
    /// Creates an engine over `store` with the default configuration.
    ///
    /// `hierarchy` must reflect the store's schema; later schema changes
    /// arrive as transactions.
    pub fn new(store: Rc<dyn BackingStore>, hierarchy: Hierarchy) -> Self {
        Self::with_config(store, hierarchy, EngineConfig::default())
    }

    pub fn with_config(store: Rc<dyn BackingStore>, hierarchy: Hierarchy, config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                store,
                hierarchy: RefCell::new(hierarchy),
                registry: RefCell::new(QueryRegistry::new()),
                refs: RefCell::new(DocumentRefs::new()),
                ways: RefCell::new(LookupWays::new()),
                config,
                closed: Cell::new(false),
                batch_depth: Cell::new(0),
                pending: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Borrows the engine's view of the schema.
    pub fn hierarchy(&self) -> Ref<'_, Hierarchy> {
        self.inner.hierarchy.borrow()
    }

    pub fn store(&self) -> Rc<dyn BackingStore> {
        Rc::clone(&self.inner.store)
    }

    // ==================== Subscriptions ====================

    /// Subscribes `callback` to the result of `(class, query, options)`.
    ///
    /// An equivalent registered query is reused, waking it if dormant;
    /// otherwise a new query is populated with one backing store fetch. The
    /// returned future resolves once the current result has been delivered
    /// to `callback`. Later calls happen whenever the result changes.
    pub async fn query<F>(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
        callback: F,
    ) -> Result<Unsubscribe>
    where
        F: Fn(&FindResult) + 'static,
    {
        self.check_open()?;
        let qid = self.get_or_create(class, query, options)?;
        let callback: ResultCallback = Rc::new(callback);
        let sid = self
            .query_ref(qid)
            .map(|q| q.borrow_mut().subscriptions.subscribe(Rc::clone(&callback)))
            .ok_or_else(|| self.gone_error())?;
        self.evict_overflow();

        let current = self.read_query(qid).await?;
        callback(&current);
        Ok(Unsubscribe {
            engine: Rc::downgrade(&self.inner),
            query: qid,
            subscription: sid,
        })
    }

    fn unsubscribe(&self, qid: QueryId, sid: SubscriptionId) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let idle = {
            let mut q = query.borrow_mut();
            q.subscriptions.unsubscribe(sid);
            q.subscriptions.is_empty()
        };
        if idle {
            self.inner.registry.borrow_mut().make_dormant(qid);
            trace!(query = qid, "query is dormant");
            self.evict_overflow();
        }
    }

    /// One-shot read through the query cache, without a subscription.
    pub async fn query_find(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.check_open()?;
        let qid = self.get_or_create(class, query, options)?;
        let result = self.read_query(qid).await;
        self.park(qid);
        result
    }

    // ==================== Reads ====================

    /// Cache-aware `find_all`.
    ///
    /// Model-domain classes go straight to the backing store. Single
    /// document reads are answered from the shared document cache when
    /// possible; anything else is served by a live query.
    pub async fn find_all(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.check_open()?;
        if self.is_model_class(class)? {
            return self.inner.store.find_all(class, query, options).await;
        }
        let cached = self
            .inner
            .refs
            .borrow()
            .find(&self.hierarchy(), class, query, options);
        if let Some(result) = cached {
            trace!(class, "answered from document cache");
            return Ok(result);
        }
        self.query_find(class, query, options).await
    }

    /// Cache-aware `find_one`.
    pub async fn find_one(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> Result<Option<Doc>> {
        let options = options.clone().with_limit(1);
        let result = self.find_all(class, query, &options).await?;
        Ok(result.docs.into_iter().next())
    }

    // ==================== Transactions ====================

    /// Applies a batch of committed transactions, in commit order.
    ///
    /// Transactions that cannot be applied to a cached result are logged and
    /// skipped. Subscribers are notified once per changed query after the
    /// whole batch.
    pub async fn tx(&self, txes: &[Tx]) -> Result<()> {
        self.check_open()?;
        let _batch = Batch::begin(self);
        let mut cache = routing::DocCache::new();
        for tx in txes {
            if self.inner.closed.get() {
                break;
            }
            self.route(tx, &mut cache).await;
        }
        Ok(())
    }

    /// Submits `tx` to the backing store, then applies it locally.
    pub async fn submit(&self, tx: &Tx) -> Result<()> {
        self.check_open()?;
        self.inner.store.tx(tx).await?;
        self.tx(std::slice::from_ref(tx)).await
    }

    // ==================== Connection lifecycle ====================

    /// Re-fetches every active query after a reconnect and drops dormant
    /// ones.
    ///
    /// With `clean`, subscribers first receive an empty result and the
    /// shared document cache is cleared.
    pub async fn refresh_connect(&self, clean: bool) -> Result<()> {
        self.check_open()?;
        let dormant = self.inner.registry.borrow_mut().drain_dormant();
        {
            let mut refs = self.inner.refs.borrow_mut();
            for query in &dormant {
                refs.release(query.borrow().id);
            }
            if clean {
                refs.clear();
            }
        }
        let ids = self.inner.registry.borrow().ids();
        debug!(active = ids.len(), dropped = dormant.len(), clean, "refreshing after reconnect");
        if clean {
            for qid in &ids {
                self.clean_query(*qid);
            }
        }
        future::join_all(ids.into_iter().map(|qid| self.refresh(qid))).await;
        Ok(())
    }

    /// Re-fetches one query from the backing store.
    ///
    /// A response is applied only if no newer refresh of the same query was
    /// issued in the meantime.
    pub async fn refresh_query(&self, qid: QueryId) -> Result<()> {
        self.check_open()?;
        if self.query_ref(qid).is_none() {
            return Err(Error::invalid_operation(format!("unknown live query: {}", qid)));
        }
        self.refresh(qid).await;
        Ok(())
    }

    /// Drops every query. Later calls fail with `Error::Closed`.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        self.remove_all_queries();
        self.inner.ways.borrow_mut().clear();
        debug!("engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    // ==================== Introspection ====================

    pub fn remove_all_queries(&self) {
        self.inner.registry.borrow_mut().clear();
        self.inner.refs.borrow_mut().clear();
        self.inner.pending.borrow_mut().clear();
    }

    /// Number of registered queries, active and dormant.
    pub fn query_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    pub fn dormant_count(&self) -> usize {
        self.inner.registry.borrow().dormant_len()
    }

    /// Number of documents in the shared document cache.
    pub fn document_refs_len(&self) -> usize {
        self.inner.refs.borrow().len()
    }

    // ==================== Internals ====================

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.get() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn gone_error(&self) -> Error {
        if self.inner.closed.get() {
            Error::Closed
        } else {
            Error::store("live query was removed before its result was read")
        }
    }

    fn is_model_class(&self, class: &str) -> Result<bool> {
        match self.hierarchy().get_domain(class) {
            Ok(d) => Ok(d == domain::MODEL),
            Err(Error::DomainNotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn query_ref(&self, qid: QueryId) -> Option<QueryRef> {
        self.inner.registry.borrow().get(qid)
    }

    fn lookup_ways(&self, lookup: &Lookup, class: &str) -> Rc<[LookupWay]> {
        let hierarchy = self.hierarchy();
        self.inner.ways.borrow_mut().get(&hierarchy, lookup, class)
    }

    /// Returns the equivalent registered query or registers a new one whose
    /// result is pending on its initial fetch.
    fn get_or_create(&self, class: &str, query: &DocumentQuery, options: &FindOptions) -> Result<QueryId> {
        self.hierarchy().get_class(class)?;
        let key = equivalence_key(class, query, options);
        let existing = self.inner.registry.borrow().find_equivalent(&key);
        if let Some(existing) = existing {
            let id = existing.borrow().id;
            if self.inner.registry.borrow_mut().wake(id) {
                trace!(query = id, "woke dormant query");
            }
            return Ok(id);
        }

        let id = self.inner.registry.borrow_mut().next_id();
        let mut live = LiveQuery::new(id, class, query.clone(), options.clone(), ResultSlot::Ready(Vec::new()))?;
        let cached = self
            .inner
            .refs
            .borrow()
            .find(&self.hierarchy(), class, query, options);
        let from_cache = cached.is_some();
        let fetch = match cached {
            Some(result) => future::ready(Ok(result)).boxed_local(),
            None => self.inner.store.find_all(class, query, options),
        };
        live.result = ResultSlot::Pending(fetch.shared());
        self.inner
            .registry
            .borrow_mut()
            .register(Rc::new(RefCell::new(live)));
        debug!(query = id, class, from_cache, "created live query");
        Ok(id)
    }

    /// Waits for the initial fetch of `qid`.
    ///
    /// Returns `Ok(false)` if the query is not registered. A failed initial
    /// fetch unregisters the query and is returned to every waiter.
    async fn ensure_ready(&self, qid: QueryId) -> Result<bool> {
        let pending = {
            let Some(query) = self.query_ref(qid) else {
                return Ok(false);
            };
            let q = query.borrow();
            match &q.result {
                ResultSlot::Ready(_) => return Ok(true),
                ResultSlot::Pending(fetch) => fetch.clone(),
            }
        };
        let fetched = pending.await;
        let Some(query) = self.query_ref(qid) else {
            return Ok(false);
        };
        if query.borrow().result.is_ready() {
            return Ok(true);
        }
        match fetched {
            Ok(result) => {
                query.borrow_mut().set_result(result);
                self.update_refs(qid);
                trace!(query = qid, "initial result ready");
                Ok(true)
            }
            Err(error) => {
                warn!(query = qid, %error, "initial fetch failed");
                self.remove_query(qid);
                Err(error)
            }
        }
    }

    /// Waits for `qid` and returns a copy of its result.
    async fn read_query(&self, qid: QueryId) -> Result<FindResult> {
        if !self.ensure_ready(qid).await? {
            return Err(self.gone_error());
        }
        self.query_ref(qid)
            .map(|q| q.borrow().snapshot())
            .ok_or_else(|| self.gone_error())
    }

    /// Makes a query without subscribers dormant.
    fn park(&self, qid: QueryId) {
        let idle = self
            .query_ref(qid)
            .map_or(false, |q| q.borrow().subscriptions.is_empty());
        if idle {
            self.inner.registry.borrow_mut().make_dormant(qid);
            self.evict_overflow();
        }
    }

    fn evict_overflow(&self) {
        let evicted = self
            .inner
            .registry
            .borrow_mut()
            .evict_overflow(&self.inner.config);
        if evicted.is_empty() {
            return;
        }
        let mut refs = self.inner.refs.borrow_mut();
        for query in &evicted {
            refs.release(query.borrow().id);
        }
        debug!(evicted = evicted.len(), "evicted dormant queries");
    }

    fn remove_query(&self, qid: QueryId) {
        self.inner.registry.borrow_mut().remove(qid);
        self.inner.refs.borrow_mut().release(qid);
    }

    /// Replaces the result with an empty one and tells subscribers.
    fn clean_query(&self, qid: QueryId) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let (empty, callbacks) = {
            let mut q = query.borrow_mut();
            q.total = q.options.total.then_some(0);
            q.result = ResultSlot::Ready(Vec::new());
            (q.snapshot(), q.subscriptions.callbacks())
        };
        for callback in callbacks {
            callback(&empty);
        }
    }

    // ==================== Refresh ====================

    /// Re-fetches `qid`, discarding the response if a newer refresh was
    /// issued meanwhile. Store failures keep the current result.
    async fn refresh(&self, qid: QueryId) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let (token, fetch) = {
            let mut q = query.borrow_mut();
            q.refresh_id += 1;
            q.refreshing = true;
            (q.refresh_id, self.inner.store.find_all(&q.class, &q.query, &q.options))
        };
        debug!(query = qid, token, "refreshing live query");
        let fetched = fetch.await;

        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let changed = {
            let mut q = query.borrow_mut();
            if q.refresh_id != token {
                debug!(query = qid, token, latest = q.refresh_id, "discarding stale refresh response");
                return;
            }
            q.refreshing = false;
            match fetched {
                Ok(result) => {
                    let total = q.options.total.then_some(result.total).flatten();
                    let same = q.docs() == Some(result.docs.as_slice()) && q.total == total;
                    q.set_result(result);
                    !same
                }
                Err(error) => {
                    warn!(query = qid, %error, "refresh failed, keeping cached result");
                    false
                }
            }
        };
        if changed {
            self.mark_changed(qid);
        } else {
            self.update_refs(qid);
        }
    }

    // ==================== Notification ====================

    fn update_refs(&self, qid: QueryId) {
        let Some(query) = self.query_ref(qid) else {
            return;
        };
        let q = query.borrow();
        if q.options.projection.is_some() {
            return;
        }
        if let Some(docs) = q.docs() {
            self.inner
                .refs
                .borrow_mut()
                .update(qid, q.options.active_lookup(), docs);
        }
    }

    /// Records a result change and notifies now, or at the end of the
    /// current batch.
    fn mark_changed(&self, qid: QueryId) {
        self.update_refs(qid);
        {
            let mut pending = self.inner.pending.borrow_mut();
            if !pending.contains(&qid) {
                pending.push(qid);
            }
        }
        if self.inner.batch_depth.get() == 0 {
            self.flush();
        }
    }

    fn flush(&self) {
        let ids = std::mem::take(&mut *self.inner.pending.borrow_mut());
        let mut deliveries = Vec::with_capacity(ids.len());
        for qid in ids {
            let Some(query) = self.query_ref(qid) else {
                continue;
            };
            let q = query.borrow();
            if q.subscriptions.is_empty() || !q.result.is_ready() {
                continue;
            }
            deliveries.push((q.snapshot(), q.subscriptions.callbacks()));
        }
        for (result, callbacks) in deliveries {
            for callback in callbacks {
                callback(&result);
            }
        }
    }
}
