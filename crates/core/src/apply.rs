//! Applying data transactions to individual documents.

use crate::doc::{is_header_field, Doc};
use crate::mixin::mixin_namespace;
use crate::tx::{Tx, TxBody};
use crate::update::{DocumentUpdate, UpdateOp};

/// Applies an update to a document in place.
///
/// Plain overwrites of header fields go through [`Doc::set`]; everything
/// else is applied to the attribute map.
pub fn apply_update(doc: &mut Doc, update: &DocumentUpdate) {
    for op in update.ops() {
        match op {
            UpdateOp::Set { path, value } if is_header_field(path) => doc.set(path, value.clone()),
            _ => op.apply(&mut doc.attributes),
        }
    }
}

/// Applies an update or mixin transaction to `doc`.
///
/// Returns false if the transaction does not modify an existing document.
pub fn apply_tx(doc: &mut Doc, tx: &Tx) -> bool {
    match &tx.body {
        TxBody::UpdateDoc { operations } => {
            apply_update(doc, operations);
        }
        TxBody::Mixin { mixin, attributes } => {
            attributes.apply(mixin_namespace(doc, mixin));
        }
        TxBody::CreateDoc { .. } | TxBody::RemoveDoc => return false,
    }
    doc.modified_on = tx.modified_on;
    doc.modified_by = tx.modified_by.clone();
    true
}
