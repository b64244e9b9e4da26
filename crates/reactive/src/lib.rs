//! livedoc Reactive - Live queries over a document log.
//!
//! This crate implements the client-side cache of query results. A query
//! registered with the [`Engine`] is fetched once from the backing store and
//! then kept current by applying committed transactions to the cached
//! result, re-fetching only when a limited window cannot be settled locally.
//!
//! # Core Concepts
//!
//! - `Engine`: Owns live queries, routes transactions, notifies subscribers
//! - `LiveQuery`: One `(class, query, options)` triple and its result
//! - `QueryRegistry`: Equivalence index and the dormant LRU queue
//! - `DocumentRefs`: Documents shared between queries, for cheap single reads
//! - `LookupWays`: Where a document may appear inside `$lookup` data
//! - `PageWindow`: Cursor pagination with head/tail detection
//!
//! # Example
//!
//! ```rust
//! use futures::executor::block_on;
//! use livedoc_core::{class, Classifier, Hierarchy, TxFactory};
//! use livedoc_query::{DocumentQuery, FindOptions};
//! use livedoc_reactive::{Engine, EngineConfig};
//! use livedoc_storage::MemoryStore;
//! use serde_json::{json, Map};
//! use std::rc::Rc;
//!
//! let task = Classifier::class("task:class:Task").extending(class::DOC).in_domain("task");
//! let mut hierarchy = Hierarchy::with_genesis();
//! hierarchy.add_classifier(task.clone());
//!
//! let store = MemoryStore::new();
//! let factory = TxFactory::new("user", 1);
//! store
//!     .apply(&factory.create_doc(class::CLASS, "core:space:Model", task.to_attributes(), Some(task.id.clone())))
//!     .unwrap();
//!
//! let config = EngineConfig::default().with_dormant_capacity(10);
//! let engine = Engine::with_config(Rc::new(store), hierarchy, config);
//!
//! block_on(async {
//!     let mut attrs = Map::new();
//!     attrs.insert("status".into(), json!("open"));
//!     engine.submit(&factory.create_doc("task:class:Task", "sp", attrs, Some("t1".into()))).await.unwrap();
//!
//!     let open = DocumentQuery::new().with("status", "open");
//!     let found = engine.find_all("task:class:Task", &open, &FindOptions::new()).await.unwrap();
//!     assert_eq!(found.ids(), vec!["t1"]);
//! });
//! ```

pub mod config;
pub mod engine;
pub mod live_query;
pub mod lookup;
pub mod refs;
pub mod registry;
pub mod subscription;
pub mod window;

pub use config::EngineConfig;
pub use engine::{Engine, Unsubscribe};
pub use live_query::{LiveQuery, PendingResult, QueryId, ResultSlot};
pub use lookup::{lookup_ways, LookupWay, LookupWays};
pub use refs::{DocumentRef, DocumentRefs};
pub use registry::{QueryRef, QueryRegistry};
pub use subscription::{ResultCallback, SubscriptionId, SubscriptionManager};
pub use window::{Direction, PageWindow};
