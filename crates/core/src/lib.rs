//! livedoc Core - Documents, schema and transactions.
//!
//! This crate provides the foundational types of the livedoc document cache:
//!
//! - `Doc`: A document with header fields, attributes and mixin namespaces
//! - `Hierarchy`: The classifier graph (classes, mixins, interfaces) with
//!   ancestor/descendant closures, domains and mixin views
//! - `Tx`: Create, update, remove and mixin transactions
//! - `DocumentUpdate`: Update operators (`$push`, `$pull`, `$inc`, ...)
//! - `Error`: Error types shared by every livedoc crate
//!
//! # Example
//!
//! ```rust
//! use livedoc_core::{class, Classifier, Hierarchy, TxFactory, DocumentUpdate};
//! use livedoc_core::apply::apply_tx;
//! use serde_json::{json, Map};
//!
//! let mut hierarchy = Hierarchy::with_genesis();
//! hierarchy.add_classifier(Classifier::class("task:class:Task").extending(class::DOC));
//! assert!(hierarchy.is_derived("task:class:Task", class::DOC));
//!
//! let factory = TxFactory::new("user1", 0);
//! let mut attrs = Map::new();
//! attrs.insert("name".into(), json!("a"));
//! let create = factory.create_doc("task:class:Task", "sp1", attrs, None);
//! let mut doc = create.create_doc().unwrap();
//!
//! let update = factory.update_doc("task:class:Task", "sp1", &doc.id, DocumentUpdate::new().set("name", "b"));
//! apply_tx(&mut doc, &update);
//! assert_eq!(doc.get("name").unwrap().as_ref(), &json!("b"));
//! ```

pub mod apply;
mod classifier;
pub mod doc;
mod error;
pub mod genesis;
mod hierarchy;
pub mod ids;
mod mixin;
pub mod path;
mod tx;
mod update;

pub use classifier::{Attribute, Classifier, ClassifierKind};
pub use doc::{Doc, LookupValue};
pub use error::{Error, Result};
pub use hierarchy::Hierarchy;
pub use ids::{class, generate_id, Domain, Ref, Timestamp};
pub use mixin::{MixinLayout, MixinView, MixinViewMut};
pub use tx::{Tx, TxBody, TxFactory};
pub use update::{DocumentUpdate, PullMatcher, UpdateOp};
