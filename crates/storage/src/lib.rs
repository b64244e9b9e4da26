//! livedoc Storage - documents, the transaction processor and backing stores.
//!
//! This crate provides:
//!
//! - `DocumentStore`: documents by id, indexed under every ancestor class
//! - `Model`: the transaction processor over a hierarchy and a store
//! - `BackingStore`: the asynchronous contract the live query engine consumes
//! - `MemoryStore`: a `BackingStore` over a local `Model`
//!
//! # Example
//!
//! ```rust
//! use futures::executor::block_on;
//! use livedoc_core::{class, Classifier, TxFactory};
//! use livedoc_query::{DocumentQuery, FindOptions};
//! use livedoc_storage::{BackingStore, MemoryStore};
//! use serde_json::Map;
//!
//! let factory = TxFactory::new("core:account:System", 1);
//! let store = MemoryStore::new();
//! let task = Classifier::class("task:class:Task").extending(class::DOC);
//! store
//!     .apply(&factory.create_doc(class::CLASS, "core:space:Model", task.to_attributes(), Some(task.id.clone())))
//!     .unwrap();
//! block_on(store.tx(&factory.create_doc("task:class:Task", "sp", Map::new(), Some("t1".into())))).unwrap();
//!
//! let found = block_on(store.find_all("task:class:Task", &DocumentQuery::new(), &FindOptions::new())).unwrap();
//! assert_eq!(found.ids(), vec!["t1"]);
//! ```

pub mod backing;
pub mod memory;
pub mod model;
pub mod store;

pub use backing::BackingStore;
pub use memory::MemoryStore;
pub use model::Model;
pub use store::DocumentStore;
