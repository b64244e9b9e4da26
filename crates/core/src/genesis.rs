//! The bootstrap model every workspace starts from.

use crate::classifier::{Attribute, Classifier};
use crate::ids::{account, class, domain, space};
use crate::tx::{Tx, TxFactory};

fn classifiers() -> Vec<Classifier> {
    vec![
        Classifier::class(class::OBJ),
        Classifier::class(class::DOC).extending(class::OBJ),
        Classifier::class(class::ATTACHED_DOC).extending(class::DOC),
        Classifier::class(class::SPACE)
            .extending(class::DOC)
            .in_domain("space"),
        Classifier::class(class::CLASS)
            .extending(class::DOC)
            .in_domain(domain::MODEL),
        Classifier::class(class::MIXIN)
            .extending(class::CLASS)
            .in_domain(domain::MODEL),
        Classifier::class(class::INTERFACE)
            .extending(class::DOC)
            .in_domain(domain::MODEL),
        Classifier::class(class::ATTRIBUTE)
            .extending(class::DOC)
            .in_domain(domain::MODEL),
        Classifier::class(class::TX)
            .extending(class::DOC)
            .in_domain(domain::TX),
        Classifier::class(class::TX_CUD).extending(class::TX),
        Classifier::class(class::TX_CREATE_DOC).extending(class::TX_CUD),
        Classifier::class(class::TX_UPDATE_DOC).extending(class::TX_CUD),
        Classifier::class(class::TX_REMOVE_DOC).extending(class::TX_CUD),
        Classifier::class(class::TX_MIXIN).extending(class::TX_CUD),
    ]
}

/// Returns the schema transactions creating the bootstrap model.
pub fn genesis_txes() -> Vec<Tx> {
    let factory = TxFactory::new(account::SYSTEM, 0);
    let mut txes: Vec<Tx> = classifiers()
        .into_iter()
        .map(|c| {
            factory.create_doc(
                c.kind.object_class(),
                space::MODEL,
                c.to_attributes(),
                Some(c.id.clone()),
            )
        })
        .collect();
    let attached_to = Attribute::new("core:attribute:attachedTo", class::ATTACHED_DOC, "attachedTo");
    txes.push(factory.create_doc(
        class::ATTRIBUTE,
        space::MODEL,
        attached_to.to_attributes(),
        Some(attached_to.id.clone()),
    ));
    txes
}
