//! Bounded FIFO log of history entries.

use std::collections::VecDeque;

use crate::types::Subject;
use crate::vault::model::HistoryEntry;

/// Default number of entries retained per log.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity ring. Pushing into a full log drops the oldest entry.
#[derive(Debug)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryLog {
    /// Create a log holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries newest first, optionally restricted to one subject.
    pub fn recent<'a>(
        &'a self,
        subject: Option<&'a Subject>,
    ) -> impl Iterator<Item = &'a HistoryEntry> + 'a {
        self.entries
            .iter()
            .rev()
            .filter(move |e| subject.is_none_or(|s| &e.subject == s))
    }
}
