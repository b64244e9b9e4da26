//! Transactions: immutable mutation records of the document log.

use crate::doc::Doc;
use crate::ids::{class, generate_id, space, Ref, Timestamp};
use crate::update::DocumentUpdate;
use serde_json::{Map, Value};
use std::cell::Cell;

/// Payload of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxBody {
    /// Create a document from attributes.
    CreateDoc { attributes: Map<String, Value> },
    /// Apply update operations to an existing document.
    UpdateDoc { operations: DocumentUpdate },
    /// Delete a document.
    RemoveDoc,
    /// Apply an update to one mixin namespace of a document.
    Mixin {
        mixin: Ref,
        attributes: DocumentUpdate,
    },
}

/// A transaction against the document log.
///
/// Transactions are themselves documents of a `core:class:Tx` subclass and
/// can be queried as such through [`Tx::to_doc`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tx {
    pub id: Ref,
    pub space: Ref,
    pub modified_on: Timestamp,
    pub modified_by: Ref,
    pub object_id: Ref,
    pub object_class: Ref,
    pub object_space: Ref,
    pub body: TxBody,
}

impl Tx {
    /// Returns the transaction's own class.
    pub fn tx_class(&self) -> &'static str {
        match self.body {
            TxBody::CreateDoc { .. } => class::TX_CREATE_DOC,
            TxBody::UpdateDoc { .. } => class::TX_UPDATE_DOC,
            TxBody::RemoveDoc => class::TX_REMOVE_DOC,
            TxBody::Mixin { .. } => class::TX_MIXIN,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self.body, TxBody::CreateDoc { .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self.body, TxBody::RemoveDoc)
    }

    /// Returns the update operations of an update or mixin transaction.
    pub fn operations(&self) -> Option<&DocumentUpdate> {
        match &self.body {
            TxBody::UpdateDoc { operations } => Some(operations),
            TxBody::Mixin { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    /// Builds the document a create transaction describes.
    pub fn create_doc(&self) -> Option<Doc> {
        match &self.body {
            TxBody::CreateDoc { attributes } => {
                let mut doc = Doc::new(
                    self.object_id.clone(),
                    self.object_class.clone(),
                    self.object_space.clone(),
                    self.modified_on,
                    self.modified_by.clone(),
                );
                doc.created_on = Some(self.modified_on);
                for (k, v) in attributes {
                    doc.set(k, v.clone());
                }
                Some(doc)
            }
            _ => None,
        }
    }

    /// Returns the transaction as a document of its own class.
    pub fn to_doc(&self) -> Doc {
        let mut doc = Doc::new(
            self.id.clone(),
            self.tx_class(),
            self.space.clone(),
            self.modified_on,
            self.modified_by.clone(),
        );
        doc.created_on = Some(self.modified_on);
        let attrs = &mut doc.attributes;
        attrs.insert("objectId".into(), Value::String(self.object_id.clone()));
        attrs.insert("objectClass".into(), Value::String(self.object_class.clone()));
        attrs.insert("objectSpace".into(), Value::String(self.object_space.clone()));
        match &self.body {
            TxBody::CreateDoc { attributes } => {
                attrs.insert("attributes".into(), Value::Object(attributes.clone()));
            }
            TxBody::UpdateDoc { operations } => {
                attrs.insert("operations".into(), operations.to_value());
            }
            TxBody::RemoveDoc => {}
            TxBody::Mixin { mixin, attributes } => {
                attrs.insert("mixin".into(), Value::String(mixin.clone()));
                attrs.insert("attributes".into(), attributes.to_value());
            }
        }
        doc
    }
}

/// Builds transactions for one account with monotonic timestamps.
///
/// The factory's clock only moves forward: every transaction gets a
/// `modified_on` strictly greater than the previous one.
pub struct TxFactory {
    account: Ref,
    clock: Cell<Timestamp>,
}

impl TxFactory {
    /// Creates a factory whose clock starts at `start`.
    pub fn new(account: impl Into<Ref>, start: Timestamp) -> Self {
        Self {
            account: account.into(),
            clock: Cell::new(start),
        }
    }

    /// Creates a factory whose clock starts at the current time.
    pub fn now(account: impl Into<Ref>) -> Self {
        Self::new(account, crate::ids::now())
    }

    fn tick(&self) -> Timestamp {
        let next = self.clock.get() + 1;
        self.clock.set(next);
        next
    }

    fn tx(&self, object_id: Ref, object_class: &str, object_space: &str, body: TxBody) -> Tx {
        Tx {
            id: generate_id(),
            space: space::TX.to_string(),
            modified_on: self.tick(),
            modified_by: self.account.clone(),
            object_id,
            object_class: object_class.to_string(),
            object_space: object_space.to_string(),
            body,
        }
    }

    /// Creates a document; a fresh id is generated when `id` is `None`.
    pub fn create_doc(
        &self,
        object_class: &str,
        object_space: &str,
        attributes: Map<String, Value>,
        id: Option<Ref>,
    ) -> Tx {
        let object_id = id.unwrap_or_else(generate_id);
        self.tx(object_id, object_class, object_space, TxBody::CreateDoc { attributes })
    }

    pub fn update_doc(
        &self,
        object_class: &str,
        object_space: &str,
        object_id: &str,
        operations: DocumentUpdate,
    ) -> Tx {
        self.tx(
            object_id.to_string(),
            object_class,
            object_space,
            TxBody::UpdateDoc { operations },
        )
    }

    pub fn remove_doc(&self, object_class: &str, object_space: &str, object_id: &str) -> Tx {
        self.tx(object_id.to_string(), object_class, object_space, TxBody::RemoveDoc)
    }

    pub fn mixin(
        &self,
        object_id: &str,
        object_class: &str,
        object_space: &str,
        mixin: &str,
        attributes: DocumentUpdate,
    ) -> Tx {
        self.tx(
            object_id.to_string(),
            object_class,
            object_space,
            TxBody::Mixin {
                mixin: mixin.to_string(),
                attributes,
            },
        )
    }
}
