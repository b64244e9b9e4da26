//! In-memory backing store.

use crate::backing::BackingStore;
use crate::model::Model;
use futures::future::{self, FutureExt, LocalBoxFuture};
use livedoc_core::{Doc, Error, Hierarchy, Result, Tx};
use livedoc_query::{DocumentQuery, FindOptions, FindResult};
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use tracing::debug;

/// A [`BackingStore`] over a local [`Model`].
///
/// Cloning shares the underlying model. Queries are answered synchronously
/// and returned as ready futures. A disconnected store fails every call with
/// `Error::Store`.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    model: Rc<RefCell<Model>>,
    connected: Rc<Cell<bool>>,
}

impl MemoryStore {
    /// Creates a store with the bootstrap model.
    pub fn new() -> Self {
        Self::from_model(Model::with_genesis())
    }

    pub fn from_model(model: Model) -> Self {
        Self {
            model: Rc::new(RefCell::new(model)),
            connected: Rc::new(Cell::new(true)),
        }
    }

    /// Borrows the model.
    pub fn model(&self) -> Ref<'_, Model> {
        self.model.borrow()
    }

    /// Returns a copy of the current schema.
    pub fn hierarchy_txes(&self) -> Vec<Tx> {
        self.model
            .borrow()
            .log()
            .iter()
            .filter(|tx| Hierarchy::is_schema_class(&tx.object_class))
            .cloned()
            .collect()
    }

    /// Applies a transaction directly, bypassing the connection state.
    pub fn apply(&self, tx: &Tx) -> Result<()> {
        self.model.borrow_mut().tx(tx)
    }

    pub fn set_connected(&self, connected: bool) {
        debug!(connected, "memory store connection changed");
        self.connected.set(connected);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn check(&self) -> Result<()> {
        if self.connected.get() {
            Ok(())
        } else {
            Err(Error::store("connection closed"))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for MemoryStore {
    fn find_all(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<FindResult>> {
        let result = self
            .check()
            .and_then(|()| self.model.borrow().find_all(class, query, options));
        future::ready(result).boxed_local()
    }

    fn find_one(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<Option<Doc>>> {
        let result = self
            .check()
            .and_then(|()| self.model.borrow().find_one(class, query, options));
        future::ready(result).boxed_local()
    }

    fn tx(&self, tx: &Tx) -> LocalBoxFuture<'static, Result<()>> {
        let result = self.check().and_then(|()| self.apply(tx));
        future::ready(result).boxed_local()
    }
}
