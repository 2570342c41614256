//! Bounded log of recent chat lines shown to the operator.

use std::collections::VecDeque;

use chatvoz_core::types::LogEntry;

/// How many entries the operator log keeps.
pub const LOG_CAPACITY: usize = 20;

#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl MessageLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add an entry, returning the oldest one if it fell off the end.
    pub fn push(&mut self, entry: LogEntry) -> Option<LogEntry> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        self.entries.push_front(entry);
        evicted
    }

    /// Entries, newest first.
    pub fn recent(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
