//! The backing store contract.
//!
//! A backing store answers queries for documents that are not resident in
//! the client and accepts new transactions for the authoritative log. Calls
//! are asynchronous and single-threaded: futures are `'static` and `!Send`.

use futures::future::{FutureExt, LocalBoxFuture};
use livedoc_core::{Doc, Result, Tx};
use livedoc_query::{DocumentQuery, FindOptions, FindResult};
use std::rc::Rc;

/// Remote source of documents and sink of transactions.
pub trait BackingStore {
    /// Finds every document of `class` matching `query`.
    fn find_all(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<FindResult>>;

    /// Finds the first matching document.
    fn find_one(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<Option<Doc>>> {
        let options = options.clone().with_limit(1);
        self.find_all(class, query, &options)
            .map(|result| result.map(|r| r.docs.into_iter().next()))
            .boxed_local()
    }

    /// Submits a transaction to the authoritative log.
    fn tx(&self, tx: &Tx) -> LocalBoxFuture<'static, Result<()>>;
}

impl<S: BackingStore + ?Sized> BackingStore for Rc<S> {
    fn find_all(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<FindResult>> {
        (**self).find_all(class, query, options)
    }

    fn find_one(
        &self,
        class: &str,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> LocalBoxFuture<'static, Result<Option<Doc>>> {
        (**self).find_one(class, query, options)
    }

    fn tx(&self, tx: &Tx) -> LocalBoxFuture<'static, Result<()>> {
        (**self).tx(tx)
    }
}
