//! Subscription management for live queries.
//!
//! This module provides subscription IDs and a manager for tracking the
//! callbacks attached to one live query.

use hashbrown::HashMap;
use livedoc_query::FindResult;
use std::rc::Rc;

/// Unique identifier for a subscription within a query.
pub type SubscriptionId = u64;

/// Callback type for result notifications.
pub type ResultCallback = Rc<dyn Fn(&FindResult)>;

/// Manages the subscriptions of one live query.
pub struct SubscriptionManager {
    subscriptions: HashMap<SubscriptionId, ResultCallback>,
    next_id: SubscriptionId,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    /// Creates a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes a callback and returns its id.
    pub fn subscribe(&mut self, callback: ResultCallback) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(id, callback);
        id
    }

    /// Unsubscribes by ID.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Returns every callback, ordered by subscription id.
    ///
    /// Callers invoke the returned callbacks after releasing any borrow of
    /// the owning query.
    pub fn callbacks(&self) -> Vec<ResultCallback> {
        let mut entries: Vec<_> = self.subscriptions.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, cb)| Rc::clone(cb)).collect()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
