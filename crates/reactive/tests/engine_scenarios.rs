//! End-to-end tests for the live query engine over an in-memory store.

use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::{FutureExt, LocalBoxFuture};
use livedoc_core::ids::space;
use livedoc_core::{class, Classifier, Doc, DocumentUpdate, Error, Hierarchy, Result, Tx, TxFactory};
use livedoc_query::{DocumentQuery, FindOptions, FindResult, Lookup, SortingOrder};
use livedoc_reactive::{Engine, EngineConfig};
use livedoc_storage::{BackingStore, MemoryStore};
use serde_json::{json, Map, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const TASK: &str = "task:class:Task";
const COMMENT: &str = "chunter:class:Comment";
const DUE: &str = "task:mixin:Due";

// ==================== Stores ====================

/// Counts every read reaching the wrapped store.
struct CountingStore {
    inner: MemoryStore,
    reads: Cell<usize>,
}

impl BackingStore for CountingStore {
    fn find_all(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<FindResult>> {
        self.reads.set(self.reads.get() + 1);
        self.inner.find_all(class, query, options)
    }

    fn tx(&self, tx: &Tx) -> LocalBoxFuture<'static, Result<()>> {
        self.inner.tx(tx)
    }
}

/// Holds reads until the test answers them by hand.
struct GatedStore {
    inner: MemoryStore,
    gated: Cell<bool>,
    waiting: RefCell<Vec<oneshot::Sender<Result<FindResult>>>>,
}

impl BackingStore for GatedStore {
    fn find_all(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<FindResult>> {
        if !self.gated.get() {
            return self.inner.find_all(class, query, options);
        }
        let (sender, receiver) = oneshot::channel();
        self.waiting.borrow_mut().push(sender);
        receiver
            .map(|answer| answer.unwrap_or_else(|_| Err(Error::store("request dropped"))))
            .boxed_local()
    }

    fn tx(&self, tx: &Tx) -> LocalBoxFuture<'static, Result<()>> {
        self.inner.tx(tx)
    }
}

// ==================== Fixtures ====================

fn classifiers() -> Vec<Classifier> {
    vec![
        Classifier::class(TASK).extending(class::DOC).in_domain("task"),
        Classifier::class(COMMENT).extending(class::ATTACHED_DOC).in_domain("chunter"),
        Classifier::mixin(DUE, TASK),
    ]
}

/// A store and a matching hierarchy with the test classes.
fn make_store(factory: &TxFactory) -> (MemoryStore, Hierarchy) {
    let store = MemoryStore::new();
    let mut hierarchy = Hierarchy::with_genesis();
    for c in classifiers() {
        store
            .apply(&factory.create_doc(c.kind.object_class(), space::MODEL, c.to_attributes(), Some(c.id.clone())))
            .unwrap();
        hierarchy.add_classifier(c);
    }
    (store, hierarchy)
}

fn attrs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn create_task(factory: &TxFactory, id: &str, name: &str) -> Tx {
    factory.create_doc(TASK, "sp", attrs(json!({ "name": name })), Some(id.to_string()))
}

/// Collects every result delivered to a subscription.
#[derive(Clone, Default)]
struct Recorder {
    results: Rc<RefCell<Vec<FindResult>>>,
}

impl Recorder {
    fn callback(&self) -> impl Fn(&FindResult) + 'static {
        let results = Rc::clone(&self.results);
        move |r: &FindResult| results.borrow_mut().push(r.clone())
    }

    fn calls(&self) -> usize {
        self.results.borrow().len()
    }

    fn last(&self) -> FindResult {
        self.results.borrow().last().cloned().unwrap()
    }

    fn last_ids(&self) -> Vec<String> {
        self.last().docs.iter().map(|d| d.id.clone()).collect()
    }

    fn last_names(&self) -> Vec<String> {
        self.last()
            .docs
            .iter()
            .map(|d| d.get("name").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default())
            .collect()
    }
}

fn by_name(limit: usize) -> FindOptions {
    FindOptions::new()
        .with_limit(limit)
        .with_sort("name", SortingOrder::Ascending)
}

// ==================== Scenarios ====================

#[test]
fn test_create_notifies_subscriber_once() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        assert_eq!(recorder.calls(), 1);
        assert!(recorder.last().is_empty());

        engine.submit(&create_task(&factory, "t1", "a")).await.unwrap();
        assert_eq!(recorder.calls(), 2);
        assert_eq!(recorder.last_names(), vec!["a"]);
    });
}

#[test]
fn test_limited_window_takes_better_document() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "b")).unwrap();
    store.apply(&create_task(&factory, "t2", "a")).unwrap();
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &by_name(1), recorder.callback())
            .await
            .unwrap();
        assert_eq!(recorder.last_names(), vec!["a"]);

        engine.submit(&create_task(&factory, "t3", "0")).await.unwrap();
        assert_eq!(recorder.last_names(), vec!["0"]);

        // A worse document leaves the window untouched.
        let calls = recorder.calls();
        engine.submit(&create_task(&factory, "t4", "z")).await.unwrap();
        assert_eq!(recorder.calls(), calls);
    });
}

#[test]
fn test_lookup_patched_without_refetch() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store
        .apply(&factory.create_doc(class::SPACE, "S", attrs(json!({ "name": "general" })), Some("S".into())))
        .unwrap();
    store
        .apply(&factory.create_doc(COMMENT, "S", attrs(json!({ "attachedTo": "S" })), Some("c1".into())))
        .unwrap();
    let counting = Rc::new(CountingStore { inner: store, reads: Cell::new(0) });
    let engine = Engine::new(counting.clone(), hierarchy);
    let recorder = Recorder::default();
    let options = FindOptions::new().with_lookup(Lookup::new().forward("attachedTo", class::SPACE));

    block_on(async {
        let _handle = engine
            .query(COMMENT, &DocumentQuery::new(), &options, recorder.callback())
            .await
            .unwrap();
        let reads = counting.reads.get();

        let rename = factory.update_doc(class::SPACE, "S", "S", DocumentUpdate::new().set("name", "random"));
        engine.submit(&rename).await.unwrap();

        assert_eq!(counting.reads.get(), reads);
        let result = recorder.last();
        let space = result.docs[0].lookup["attachedTo"].as_one().unwrap();
        assert_eq!(space.get("name").unwrap().as_ref(), "random");
    });
}

#[test]
fn test_remove_from_full_window_refreshes() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    for (id, name) in [("x", "1"), ("y", "2"), ("z", "3")] {
        store.apply(&create_task(&factory, id, name)).unwrap();
    }
    let counting = Rc::new(CountingStore { inner: store, reads: Cell::new(0) });
    let engine = Engine::new(counting.clone(), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &by_name(2), recorder.callback())
            .await
            .unwrap();
        assert_eq!(recorder.last_ids(), vec!["x", "y"]);
        let reads = counting.reads.get();

        engine.submit(&factory.remove_doc(TASK, "sp", "x")).await.unwrap();
        assert_eq!(counting.reads.get(), reads + 1);
        assert_eq!(recorder.last_ids(), vec!["y", "z"]);
    });
}

#[test]
fn test_equivalent_queries_share_one_fetch() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    let counting = Rc::new(CountingStore { inner: store, reads: Cell::new(0) });
    let engine = Engine::new(counting.clone(), hierarchy);
    let first = Recorder::default();
    let second = Recorder::default();
    let query = DocumentQuery::new().with("name", "a");
    let options = FindOptions::new();

    block_on(async {
        let (a, b) = futures::join!(
            engine.query(TASK, &query, &options, first.callback()),
            engine.query(TASK, &query, &options, second.callback()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.query_id(), b.query_id());
        assert_eq!(counting.reads.get(), 1);
        assert_eq!(first.last_ids(), vec!["t1"]);
        assert_eq!(second.last_ids(), vec!["t1"]);
        assert_eq!(engine.query_count(), 1);

        engine.query_find(TASK, &query, &FindOptions::new()).await.unwrap();
        assert_eq!(counting.reads.get(), 1);
    });
}

#[test]
fn test_shared_document_outlives_first_eviction() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    store.apply(&create_task(&factory, "t2", "b")).unwrap();
    let config = EngineConfig::default().with_dormant_capacity(0);
    let engine = Engine::with_config(Rc::new(store), hierarchy, config);

    block_on(async {
        let all = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), |_| {})
            .await
            .unwrap();
        let only_a = engine
            .query(TASK, &DocumentQuery::new().with("name", "a"), &FindOptions::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(engine.document_refs_len(), 2);

        all.unsubscribe();
        assert_eq!(engine.query_count(), 1);
        assert_eq!(engine.document_refs_len(), 1);

        only_a.unsubscribe();
        assert_eq!(engine.query_count(), 0);
        assert_eq!(engine.document_refs_len(), 0);
    });
}

// ==================== Lifecycle ====================

#[test]
fn test_unsubscribe_makes_query_dormant_then_reuses_it() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let counting = Rc::new(CountingStore { inner: store, reads: Cell::new(0) });
    let engine = Engine::new(counting.clone(), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        handle.unsubscribe();
        assert_eq!(engine.dormant_count(), 1);

        // Dormant queries keep tracking transactions.
        engine.submit(&create_task(&factory, "t1", "a")).await.unwrap();
        assert_eq!(recorder.calls(), 1);

        let again = Recorder::default();
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), again.callback())
            .await
            .unwrap();
        assert_eq!(engine.dormant_count(), 0);
        assert_eq!(counting.reads.get(), 1);
        assert_eq!(again.last_ids(), vec!["t1"]);
    });
}

#[test]
fn test_zero_capacity_never_evicts_active_queries() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let config = EngineConfig::default().with_dormant_capacity(0);
    let engine = Engine::with_config(Rc::new(store), hierarchy, config);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        engine
            .query_find(TASK, &DocumentQuery::new().with("name", "b"), &FindOptions::new())
            .await
            .unwrap();
        assert_eq!(engine.query_count(), 1);
        assert_eq!(engine.dormant_count(), 0);

        engine.submit(&create_task(&factory, "t1", "a")).await.unwrap();
        assert_eq!(recorder.last_ids(), vec!["t1"]);
    });
}

#[test]
fn test_stale_refresh_response_is_discarded() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let gated = Rc::new(GatedStore {
        inner: store,
        gated: Cell::new(false),
        waiting: RefCell::new(Vec::new()),
    });
    let engine = Engine::new(gated.clone(), hierarchy);
    let recorder = Recorder::default();
    let stale = Doc::new("old", TASK, "sp", 1, "user");
    let fresh = Doc::new("new", TASK, "sp", 2, "user");

    block_on(async {
        let handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        let qid = handle.query_id();
        gated.gated.set(true);

        let answer = async {
            let mut waiting: Vec<_> = gated.waiting.borrow_mut().drain(..).collect();
            assert_eq!(waiting.len(), 2);
            let first = waiting.remove(0);
            let second = waiting.remove(0);
            second.send(Ok(FindResult::new(vec![fresh.clone()], None))).ok();
            first.send(Ok(FindResult::new(vec![stale.clone()], None))).ok();
        };
        let (a, b, ()) = futures::join!(engine.refresh_query(qid), engine.refresh_query(qid), answer);
        a.unwrap();
        b.unwrap();
        assert_eq!(recorder.last_ids(), vec!["new"]);
    });
}

#[test]
fn test_store_error_keeps_cached_result() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    let shared = Rc::new(store);
    let engine = Engine::new(shared.clone(), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        shared.set_connected(false);
        engine.refresh_query(handle.query_id()).await.unwrap();
        assert_eq!(recorder.calls(), 1);
        assert_eq!(recorder.last_ids(), vec!["t1"]);

        let err = engine
            .query(TASK, &DocumentQuery::new().with("name", "zzz"), &FindOptions::new(), |_| {})
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Store { .. }));
        assert_eq!(engine.query_count(), 1);
    });
}

#[test]
fn test_refresh_connect_drops_dormant_and_reloads_active() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let shared = Rc::new(store);
    let engine = Engine::new(shared.clone(), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        engine
            .query_find(TASK, &DocumentQuery::new().with("name", "b"), &FindOptions::new())
            .await
            .unwrap();
        assert_eq!(engine.query_count(), 2);

        // Missed while disconnected.
        shared.apply(&create_task(&factory, "t1", "a")).unwrap();
        engine.refresh_connect(true).await.unwrap();

        assert_eq!(engine.query_count(), 1);
        let results = recorder.results.borrow();
        let n = results.len();
        assert!(results[n - 2].is_empty());
        assert_eq!(results[n - 1].ids(), vec!["t1"]);
    });
}

#[test]
fn test_close_rejects_later_calls() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let engine = Engine::new(Rc::new(store), hierarchy);

    block_on(async {
        engine
            .query_find(TASK, &DocumentQuery::new(), &FindOptions::new())
            .await
            .unwrap();
        engine.close();
        assert!(engine.is_closed());
        assert_eq!(engine.query_count(), 0);

        let err = engine.find_all(TASK, &DocumentQuery::new(), &FindOptions::new()).await;
        assert_eq!(err.err(), Some(Error::Closed));
        let err = engine.tx(&[create_task(&factory, "t1", "a")]).await;
        assert_eq!(err.err(), Some(Error::Closed));
    });
}

#[test]
fn test_unknown_class_is_rejected() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let engine = Engine::new(Rc::new(store), hierarchy);
    let err = block_on(engine.query_find("nope:class:Nope", &DocumentQuery::new(), &FindOptions::new()));
    assert!(matches!(err, Err(Error::ClassNotFound { .. })));
}

// ==================== Incremental updates ====================

#[test]
fn test_update_moves_document_in_and_out() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    store.apply(&create_task(&factory, "t2", "b")).unwrap();
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();
    let options = FindOptions::new().with_total(true);

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new().with("name", "a"), &options, recorder.callback())
            .await
            .unwrap();
        assert_eq!(recorder.last().total, Some(1));

        let into = factory.update_doc(TASK, "sp", "t2", DocumentUpdate::new().set("name", "a"));
        engine.submit(&into).await.unwrap();
        assert_eq!(recorder.last_ids(), vec!["t1", "t2"]);
        assert_eq!(recorder.last().total, Some(2));

        let out = factory.update_doc(TASK, "sp", "t1", DocumentUpdate::new().set("name", "c"));
        engine.submit(&out).await.unwrap();
        assert_eq!(recorder.last_ids(), vec!["t2"]);
        assert_eq!(recorder.last().total, Some(1));
    });
}

#[test]
fn test_batch_notifies_once() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let shared = Rc::new(store);
    let engine = Engine::new(shared.clone(), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        let batch = vec![create_task(&factory, "t1", "a"), create_task(&factory, "t2", "b")];
        for tx in &batch {
            shared.apply(tx).unwrap();
        }
        engine.tx(&batch).await.unwrap();
        assert_eq!(recorder.calls(), 2);
        assert_eq!(recorder.last_ids(), vec!["t1", "t2"]);
    });
}

#[test]
fn test_reverse_lookup_tracks_attachments() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();
    let options = FindOptions::new().with_lookup(Lookup::new().reverse("comments", COMMENT, "attachedTo"));

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new(), &options, recorder.callback())
            .await
            .unwrap();
        let comment = factory.create_doc(COMMENT, "sp", attrs(json!({ "attachedTo": "t1" })), Some("c1".into()));
        engine.submit(&comment).await.unwrap();
        let comments = |r: &FindResult| r.docs[0].lookup["comments"].as_many().map_or(0, <[Doc]>::len);
        assert_eq!(comments(&recorder.last()), 1);

        engine.submit(&factory.remove_doc(COMMENT, "sp", "c1")).await.unwrap();
        assert_eq!(comments(&recorder.last()), 0);
    });
}

#[test]
fn test_tx_log_query() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(class::TX_CREATE_DOC, &DocumentQuery::new().with("objectClass", TASK), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        let create = create_task(&factory, "t1", "a");
        engine.submit(&create).await.unwrap();
        assert_eq!(recorder.last_ids(), vec![create.id.clone()]);
    });
}

#[test]
fn test_update_matches_header_predicates() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    let counting = Rc::new(CountingStore { inner: store, reads: Cell::new(0) });
    let engine = Engine::new(counting.clone(), hierarchy);
    let by_bob = Recorder::default();
    let recent = Recorder::default();
    let by_carol = Recorder::default();

    block_on(async {
        let _a = engine
            .query(TASK, &DocumentQuery::new().with("modifiedBy", "bob"), &FindOptions::new(), by_bob.callback())
            .await
            .unwrap();
        let _b = engine
            .query(
                TASK,
                &DocumentQuery::new().with("modifiedOn", json!({ "$gt": 50 })),
                &FindOptions::new(),
                recent.callback(),
            )
            .await
            .unwrap();
        let _c = engine
            .query(TASK, &DocumentQuery::new().with("modifiedBy", "carol"), &FindOptions::new(), by_carol.callback())
            .await
            .unwrap();
        assert!(by_bob.last().is_empty());
        assert!(recent.last().is_empty());

        let bob = TxFactory::new("bob", 100);
        let rename = bob.update_doc(TASK, "sp", "t1", DocumentUpdate::new().set("name", "b"));
        engine.submit(&rename).await.unwrap();

        assert_eq!(by_bob.last_ids(), vec!["t1"]);
        assert_eq!(recent.last_ids(), vec!["t1"]);
        assert_eq!(by_carol.calls(), 1);
    });
}

#[test]
fn test_update_moving_space_enters_result() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new().with("space", "archive"), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        let rename = factory.update_doc(TASK, "sp", "t1", DocumentUpdate::new().set("name", "b"));
        engine.submit(&rename).await.unwrap();
        assert!(recorder.last().is_empty());

        let archive = factory.update_doc(TASK, "sp", "t1", DocumentUpdate::new().set("space", "archive"));
        engine.submit(&archive).await.unwrap();
        assert_eq!(recorder.last_ids(), vec!["t1"]);
    });
}

#[test]
fn test_lookup_predicate_filters_results() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    for (id, name) in [("S", "general"), ("R", "random")] {
        store
            .apply(&factory.create_doc(class::SPACE, id, attrs(json!({ "name": name })), Some(id.into())))
            .unwrap();
    }
    store
        .apply(&factory.create_doc(COMMENT, "S", attrs(json!({ "attachedTo": "S" })), Some("c1".into())))
        .unwrap();
    store
        .apply(&factory.create_doc(COMMENT, "R", attrs(json!({ "attachedTo": "R" })), Some("c2".into())))
        .unwrap();
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();
    let query = DocumentQuery::new().with("$lookup.attachedTo.name", "general");
    let options = FindOptions::new().with_lookup(Lookup::new().forward("attachedTo", class::SPACE));

    block_on(async {
        let _handle = engine.query(COMMENT, &query, &options, recorder.callback()).await.unwrap();
        assert_eq!(recorder.last_ids(), vec!["c1"]);

        let matching = factory.create_doc(COMMENT, "S", attrs(json!({ "attachedTo": "S" })), Some("c3".into()));
        engine.submit(&matching).await.unwrap();
        let other = factory.create_doc(COMMENT, "R", attrs(json!({ "attachedTo": "R" })), Some("c4".into()));
        engine.submit(&other).await.unwrap();

        assert_eq!(recorder.last_ids(), vec!["c1", "c3"]);
        let space = recorder.last().docs[1].lookup["attachedTo"].as_one().cloned().unwrap();
        assert_eq!(space.id, "S");
    });
}

#[test]
fn test_mixin_updates_follow_mixin_view() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    let engine = Engine::new(Rc::new(store), hierarchy);
    let any_due = Recorder::default();
    let due_seven = Recorder::default();
    let due_of = |r: &Recorder| {
        r.last().docs[0]
            .mixin_data(DUE)
            .and_then(|m| m.get("due").cloned())
            .unwrap_or(Value::Null)
    };

    block_on(async {
        let _a = engine
            .query(DUE, &DocumentQuery::new(), &FindOptions::new(), any_due.callback())
            .await
            .unwrap();
        let _b = engine
            .query(DUE, &DocumentQuery::new().with("due", 7), &FindOptions::new(), due_seven.callback())
            .await
            .unwrap();
        assert!(any_due.last().is_empty());

        let set_due = |due: i64| factory.mixin("t1", TASK, "sp", DUE, DocumentUpdate::new().set("due", due));

        engine.submit(&set_due(5)).await.unwrap();
        assert_eq!(any_due.last_ids(), vec!["t1"]);
        assert_eq!(due_of(&any_due), json!(5));
        assert!(due_seven.last().is_empty());

        engine.submit(&set_due(7)).await.unwrap();
        assert_eq!(due_of(&any_due), json!(7));
        assert_eq!(due_seven.last_ids(), vec!["t1"]);

        engine.submit(&set_due(8)).await.unwrap();
        assert_eq!(due_of(&any_due), json!(8));
        assert!(due_seven.last().is_empty());
    });
}

#[test]
fn test_mixin_by_user_enters_header_query() {
    let factory = TxFactory::new("user", 1);
    let (store, hierarchy) = make_store(&factory);
    store.apply(&create_task(&factory, "t1", "a")).unwrap();
    let engine = Engine::new(Rc::new(store), hierarchy);
    let recorder = Recorder::default();

    block_on(async {
        let _handle = engine
            .query(TASK, &DocumentQuery::new().with("modifiedBy", "bob"), &FindOptions::new(), recorder.callback())
            .await
            .unwrap();
        let bob = TxFactory::new("bob", 100);
        engine
            .submit(&bob.mixin("t1", TASK, "sp", DUE, DocumentUpdate::new().set("due", 1)))
            .await
            .unwrap();
        assert_eq!(recorder.last_ids(), vec!["t1"]);

        let ann = TxFactory::new("ann", 200);
        engine
            .submit(&ann.mixin("t1", TASK, "sp", DUE, DocumentUpdate::new().set("due", 2)))
            .await
            .unwrap();
        assert!(recorder.last().is_empty());
    });
}
