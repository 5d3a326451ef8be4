use std::collections::{HashMap, VecDeque};

use crate::RetrievalResult;

/// Bounded FIFO cache of retrieval results keyed by normalised query text.
///
/// Entries are not invalidated when the chunk store changes. A process that
/// outlives an indexing run must call [`QueryCache::clear`] to see new chunks.
#[derive(Debug, Default)]
pub struct QueryCache {
    capacity: usize,
    entries: HashMap<String, RetrievalResult>,
    order: VecDeque<String>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Cache key for a query: surrounding whitespace removed, lower-cased.
    pub fn normalise(query: &str) -> String {
        query.trim().to_lowercase()
    }

    pub fn get(&self, query: &str) -> Option<RetrievalResult> {
        self.entries.get(&Self::normalise(query)).cloned()
    }

    pub fn insert(&mut self, query: &str, result: RetrievalResult) {
        if self.capacity == 0 {
            return;
        }

        let key = Self::normalise(query);
        if self.entries.insert(key.clone(), result).is_some() {
            return;
        }

        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
