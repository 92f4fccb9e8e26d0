//! Single-pass work distribution.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Hands out the items of a fixed list to concurrent consumers
///
/// Every item is returned by exactly one call to [`WorkQueue::next_item`];
/// once the list is exhausted every call returns `None`.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    /// Queue over `items`, materialized once
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    /// Next undelivered item, or `None` once depleted
    pub fn next_item(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Items not yet delivered
    pub fn remaining(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A consumer panicking while popping cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
