//! Live query state.
//!
//! A `LiveQuery` owns the cached result of one `(class, query, options)`
//! triple. The result starts out pending on the initial backing store fetch
//! and is resolved before any synchronous access.

use crate::subscription::SubscriptionManager;
use futures::future::{LocalBoxFuture, Shared};
use livedoc_core::{Doc, Hierarchy, Ref, Result};
use livedoc_query::{
    equivalence_key, DocumentMatcher, DocumentQuery, DocumentSorter, FindOptions, FindResult,
};

/// Identifier of a registered live query.
pub type QueryId = u64;

/// A shared in-flight fetch.
pub type PendingResult = Shared<LocalBoxFuture<'static, Result<FindResult>>>;

/// The cached result of a live query.
pub enum ResultSlot {
    /// Initial fetch in flight.
    Pending(PendingResult),
    /// Resolved documents in result order.
    Ready(Vec<Doc>),
}

impl ResultSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self, ResultSlot::Ready(_))
    }
}

/// One registered query and its cached result.
pub struct LiveQuery {
    pub(crate) id: QueryId,
    pub(crate) class: Ref,
    pub(crate) query: DocumentQuery,
    pub(crate) options: FindOptions,
    pub(crate) key: String,
    pub(crate) matcher: DocumentMatcher,
    pub(crate) result: ResultSlot,
    pub(crate) total: Option<usize>,
    pub(crate) subscriptions: SubscriptionManager,
    /// Token of the latest refresh; responses carrying an older token are
    /// discarded.
    pub(crate) refresh_id: u64,
    /// A refresh response is outstanding.
    pub(crate) refreshing: bool,
}

impl LiveQuery {
    pub(crate) fn new(
        id: QueryId,
        class: &str,
        query: DocumentQuery,
        options: FindOptions,
        result: ResultSlot,
    ) -> Result<Self> {
        let matcher = DocumentMatcher::new(class, &query)?;
        Ok(Self {
            id,
            key: equivalence_key(class, &query, &options),
            class: class.to_string(),
            query,
            options,
            matcher,
            result,
            total: None,
            subscriptions: SubscriptionManager::new(),
            refresh_id: 0,
            refreshing: false,
        })
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    /// Resolved documents, or `None` while the initial fetch is pending.
    pub fn docs(&self) -> Option<&[Doc]> {
        match &self.result {
            ResultSlot::Ready(docs) => Some(docs),
            ResultSlot::Pending(_) => None,
        }
    }

    pub(crate) fn docs_mut(&mut self) -> Option<&mut Vec<Doc>> {
        match &mut self.result {
            ResultSlot::Ready(docs) => Some(docs),
            ResultSlot::Pending(_) => None,
        }
    }

    /// Installs a fetched result.
    pub(crate) fn set_result(&mut self, result: FindResult) {
        self.total = if self.options.total { result.total } else { None };
        self.result = ResultSlot::Ready(result.docs);
    }

    /// Returns a copy of the current result.
    pub fn snapshot(&self) -> FindResult {
        let docs = self.docs().map(<[Doc]>::to_vec).unwrap_or_default();
        FindResult::new(docs, self.total)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.docs()?.iter().position(|d| d.id == id)
    }

    /// Returns true if the query holds exactly `limit` documents.
    pub fn is_full(&self) -> bool {
        match (self.options.limit, self.docs()) {
            (Some(limit), Some(docs)) => docs.len() == limit,
            _ => false,
        }
    }

    pub(crate) fn sorter(&self, hierarchy: &Hierarchy) -> DocumentSorter {
        DocumentSorter::new(hierarchy, &self.class, &self.options.sort)
    }

    pub(crate) fn resort(&mut self, hierarchy: &Hierarchy) {
        let sorter = self.sorter(hierarchy);
        if let Some(docs) = self.docs_mut() {
            sorter.sort(docs);
        }
    }

    /// Inserts `doc` at its sorted position and returns the index.
    pub(crate) fn insert_sorted(&mut self, hierarchy: &Hierarchy, doc: Doc) -> usize {
        let sorter = self.sorter(hierarchy);
        let Some(docs) = self.docs_mut() else {
            return 0;
        };
        let at = sorter.insert_position(docs, &doc);
        docs.insert(at, doc);
        at
    }

    pub(crate) fn remove_doc(&mut self, id: &str) -> Option<Doc> {
        let at = self.position(id)?;
        let removed = self.docs_mut().map(|docs| docs.remove(at));
        if removed.is_some() {
            self.decrement_total();
        }
        removed
    }

    pub(crate) fn increment_total(&mut self) {
        if let Some(total) = self.total.as_mut() {
            *total += 1;
        }
    }

    pub(crate) fn decrement_total(&mut self) {
        if let Some(total) = self.total.as_mut() {
            *total = total.saturating_sub(1);
        }
    }

    /// Returns true if an update touching the fields accepted by `touched`
    /// may reorder the result.
    pub(crate) fn needs_sort(&self, mut touched: impl FnMut(&str) -> bool) -> bool {
        self.options.sort.iter().any(|(field, _)| {
            field == "modifiedOn" || field == "modifiedBy" || touched(field)
        })
    }
}
