//! Cursor-based pagination over a sort field.
//!
//! A `PageWindow` grows in either direction one page at a time. Each page is
//! requested with one extra document so the window knows whether it has
//! reached the end without a second round trip.

use crate::engine::Engine;
use livedoc_core::{Doc, Ref, Result};
use livedoc_query::{DocumentQuery, FindOptions, SortingOrder};
use serde_json::{Map, Value};
use tracing::trace;

/// Direction in which a window grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards larger values of the sort field, appended at the tail.
    Forward,
    /// Towards smaller values, prepended at the head.
    Backward,
}

/// A growing window of documents ordered by one field.
pub struct PageWindow {
    engine: Engine,
    class: Ref,
    query: DocumentQuery,
    field: String,
    limit: usize,
    docs: Vec<Doc>,
    head: bool,
    tail: bool,
}

impl PageWindow {
    /// Creates an empty window over documents of `class` matching `query`,
    /// ordered ascending by `field`, loading `limit` documents per page.
    pub fn new(engine: Engine, class: &str, query: DocumentQuery, field: &str, limit: usize) -> Self {
        Self {
            engine,
            class: class.to_string(),
            query,
            field: field.to_string(),
            limit: limit.max(1),
            docs: Vec::new(),
            head: false,
            tail: false,
        }
    }

    /// Documents in ascending field order.
    pub fn docs(&self) -> &[Doc] {
        &self.docs
    }

    /// True once a backward load found nothing more before the head.
    pub fn has_head(&self) -> bool {
        self.head
    }

    /// True once a forward load found nothing more after the tail.
    pub fn has_tail(&self) -> bool {
        self.tail
    }

    fn cursor(&self, direction: Direction) -> Option<Value> {
        let doc = match direction {
            Direction::Forward => self.docs.last(),
            Direction::Backward => self.docs.first(),
        }?;
        doc.get(&self.field).map(|v| v.into_owned())
    }

    /// Loads the next page in `direction` and returns how many documents
    /// were added.
    pub async fn load_next(&mut self, direction: Direction) -> Result<usize> {
        let (reached, order, op) = match direction {
            Direction::Forward => (self.tail, SortingOrder::Ascending, "$gt"),
            Direction::Backward => (self.head, SortingOrder::Descending, "$lt"),
        };
        if reached {
            return Ok(0);
        }

        let mut query = self.query.clone();
        if let Some(cursor) = self.cursor(direction) {
            let mut bound = Map::new();
            bound.insert(op.to_string(), cursor);
            query = query.with(&self.field, Value::Object(bound));
        }
        let options = FindOptions::new()
            .with_sort(&self.field, order)
            .with_limit(self.limit + 1);
        let mut page = self.engine.find_all(&self.class, &query, &options).await?.docs;

        let more = page.len() > self.limit;
        page.truncate(self.limit);
        let added = page.len();
        trace!(class = %self.class, ?direction, added, more, "loaded page");
        match direction {
            Direction::Forward => {
                self.tail = !more;
                self.docs.extend(page);
            }
            Direction::Backward => {
                self.head = !more;
                page.reverse();
                page.append(&mut self.docs);
                self.docs = page;
            }
        }
        Ok(added)
    }
}
