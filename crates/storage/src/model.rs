//! The transaction processor.
//!
//! A `Model` owns a schema [`Hierarchy`] and a [`DocumentStore`] and applies
//! the transaction log to both:
//!
//! - schema transactions (classes, mixins, interfaces, attributes) update the
//!   hierarchy and are stored as documents of the model domain;
//! - `CreateDoc` inserts the synthesized document under every ancestor class;
//! - `UpdateDoc` and `Mixin` mutate the stored document in place;
//! - `RemoveDoc` deletes it from every index.
//!
//! Every applied transaction is appended to the log, which is readable as
//! `core:class:Tx` documents. The model also answers `find_all` with
//! predicate, sort, limit, total, projection and lookup support.

use crate::store::DocumentStore;
use livedoc_core::apply::apply_tx;
use livedoc_core::genesis::genesis_txes;
use livedoc_core::{class, Doc, Error, Hierarchy, LookupValue, Result, Tx, TxBody};
use livedoc_query::{
    is_instance, DocumentMatcher, DocumentQuery, DocumentSorter, FindOptions, FindResult, Lookup,
};
use serde_json::Value;
use tracing::{trace, warn};

/// Schema plus documents plus the transaction log.
#[derive(Debug, Default)]
pub struct Model {
    hierarchy: Hierarchy,
    store: DocumentStore,
    log: Vec<Tx>,
}

impl Model {
    /// Creates a model with an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a model loaded with the bootstrap classifiers.
    pub fn with_genesis() -> Self {
        let mut model = Self::new();
        model.load(genesis_txes());
        model
    }

    /// Loads a historical log in two passes: schema first, then documents.
    ///
    /// Transactions that fail to apply are logged and skipped.
    pub fn load(&mut self, txes: Vec<Tx>) {
        for tx in txes.iter().filter(|tx| Hierarchy::is_schema_class(&tx.object_class)) {
            if let Err(error) = self.hierarchy.tx(tx) {
                warn!(tx = %tx.id, object = %tx.object_id, %error, "skipping schema transaction");
            }
        }
        for tx in txes {
            if let Err(error) = self.apply_doc(&tx) {
                warn!(tx = %tx.id, object = %tx.object_id, %error, "skipping transaction");
            }
            self.log.push(tx);
        }
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Returns the applied transactions in order.
    pub fn log(&self) -> &[Tx] {
        &self.log
    }

    pub fn get(&self, id: &str) -> Option<&Doc> {
        self.store.get(id)
    }

    // ==================== Transactions ====================

    /// Applies one transaction.
    ///
    /// Update, remove and mixin transactions on an unknown document fail with
    /// `DocumentNotFound` and leave the model unchanged.
    pub fn tx(&mut self, tx: &Tx) -> Result<()> {
        if Hierarchy::is_schema_class(&tx.object_class) {
            self.hierarchy.tx(tx)?;
        }
        self.apply_doc(tx)?;
        self.log.push(tx.clone());
        trace!(tx = %tx.id, class = tx.tx_class(), "applied transaction");
        Ok(())
    }

    /// Applies a batch in order, skipping and logging transactions that
    /// fail. Returns the number applied.
    pub fn apply_all<'a>(&mut self, txes: impl IntoIterator<Item = &'a Tx>) -> usize {
        let mut applied = 0;
        for tx in txes {
            match self.tx(tx) {
                Ok(()) => applied += 1,
                Err(error) => {
                    warn!(tx = %tx.id, object = %tx.object_id, %error, "skipping transaction")
                }
            }
        }
        applied
    }

    fn apply_doc(&mut self, tx: &Tx) -> Result<()> {
        match &tx.body {
            TxBody::CreateDoc { .. } => {
                if let Some(doc) = tx.create_doc() {
                    self.store.insert(&self.hierarchy, doc)?;
                }
            }
            TxBody::UpdateDoc { .. } | TxBody::Mixin { .. } => {
                let doc = self.store.get_or_err(&tx.object_id)?;
                apply_tx(doc, tx);
            }
            TxBody::RemoveDoc => {
                self.store
                    .remove(&self.hierarchy, &tx.object_id)
                    .ok_or_else(|| Error::document_not_found(&tx.object_id))?;
            }
        }
        Ok(())
    }

    // ==================== Queries ====================

    /// Finds documents of `class` matching `query`.
    pub fn find_all(&self, class: &str, query: &DocumentQuery, options: &FindOptions) -> Result<FindResult> {
        self.hierarchy.get_class(class)?;
        let matcher = DocumentMatcher::new(class, query)?;
        let lookup = options.active_lookup();
        let lookup_first = matcher.predicate().has_lookup_fields();

        let mut docs: Vec<Doc> = self
            .candidates(class)
            .into_iter()
            .filter(|d| matcher.matches_skip_lookup(&self.hierarchy, d))
            .collect();

        if lookup_first {
            if let Some(lookup) = lookup {
                for doc in &mut docs {
                    self.resolve_lookup(doc, lookup);
                }
            }
            docs.retain(|d| matcher.matches(&self.hierarchy, d));
        }

        DocumentSorter::new(&self.hierarchy, class, &options.sort).sort(&mut docs);
        let total = options.total.then_some(docs.len());
        if let Some(limit) = options.limit {
            docs.truncate(limit);
        }

        if !lookup_first {
            if let Some(lookup) = lookup {
                for doc in &mut docs {
                    self.resolve_lookup(doc, lookup);
                }
            }
        }
        if let Some(fields) = &options.projection {
            for doc in &mut docs {
                doc.project(fields);
            }
        }
        Ok(FindResult::new(docs, total))
    }

    /// Finds the first matching document in result order.
    pub fn find_one(&self, class: &str, query: &DocumentQuery, options: &FindOptions) -> Result<Option<Doc>> {
        let options = options.clone().with_limit(1);
        Ok(self.find_all(class, query, &options)?.docs.into_iter().next())
    }

    fn candidates(&self, class: &str) -> Vec<Doc> {
        let base = self.hierarchy.class_or_base(class);
        if self.hierarchy.is_derived(&base, class::TX) {
            return self.log.iter().map(Tx::to_doc).collect();
        }
        self.store.find_by_class(&base).into_iter().cloned().collect()
    }

    /// Populates `$lookup` on `doc`.
    pub fn resolve_lookup(&self, doc: &mut Doc, lookup: &Lookup) {
        for (field, target) in &lookup.forward {
            let id = doc.get(field).and_then(|v| match v.as_ref() {
                Value::String(s) => Some(s.clone()),
                _ => None,
            });
            let mut resolved = id
                .and_then(|id| self.store.get(&id))
                .filter(|d| is_instance(&self.hierarchy, &target.class, d))
                .cloned();
            if let (Some(found), Some(nested)) = (resolved.as_mut(), target.nested.as_deref()) {
                self.resolve_lookup(found, nested);
            }
            doc.lookup
                .insert(field.clone(), LookupValue::One(resolved.map(Box::new)));
        }
        for (key, reverse) in &lookup.reverse {
            let owner = Value::String(doc.id.clone());
            let mut attached: Vec<Doc> = self
                .candidates(&reverse.class)
                .into_iter()
                .filter(|d| is_instance(&self.hierarchy, &reverse.class, d))
                .filter(|d| d.get(&reverse.attach_key).as_deref() == Some(&owner))
                .collect();
            attached.sort_by(|a, b| a.id.cmp(&b.id));
            doc.lookup.insert(key.clone(), LookupValue::Many(attached));
        }
    }
}
