//! Bounded History: fixed-capacity ring for health observations
//!
//! The supervisor runs for months, so every history it keeps (memory samples,
//! performance entries, faults) must stay bounded. Appending past capacity
//! drops the oldest entry.
//!
//! # Example
//!
//! ```
//! use kiosk_core_resilience::history::BoundedHistory;
//!
//! let mut history = BoundedHistory::new(2);
//! history.push("a");
//! history.push("b");
//! history.push("c"); // drops "a"
//!
//! assert_eq!(history.len(), 2);
//! assert_eq!(history.latest(), Some(&"c"));
//! assert_eq!(history.stats().total_dropped, 1);
//! ```

use serde::Serialize;
use std::collections::VecDeque;

/// Capacity of every supervisor history
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Ring of the most recent `capacity` entries, oldest first.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
    total_received: u64,
    total_dropped: u64,
}

impl<T> BoundedHistory<T> {
    /// Create a history holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total_received: 0,
            total_dropped: 0,
        }
    }

    /// Append an entry, dropping from the front while over capacity
    pub fn push(&mut self, entry: T) {
        self.total_received += 1;
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.total_dropped += 1;
        }
    }

    /// Keep only the newest `keep` entries
    pub fn trim_to(&mut self, keep: usize) {
        while self.entries.len() > keep {
            self.entries.pop_front();
            self.total_dropped += 1;
        }
    }

    pub fn clear(&mut self) {
        self.total_dropped += self.entries.len() as u64;
        self.entries.clear();
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.entries.iter()
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

    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            current_count: self.entries.len(),
            capacity: self.capacity,
            total_received: self.total_received,
            total_dropped: self.total_dropped,
        }
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Copy the entries out, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Counters describing a history's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    /// Entries currently held
    pub current_count: usize,
    /// Maximum entries held at once
    pub capacity: usize,
    /// Entries ever appended
    pub total_received: u64,
    /// Entries dropped by overflow, trimming or clearing
    pub total_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut history = BoundedHistory::new(10);
        history.push(1);
        history.push(2);

        assert_eq!(history.len(), 2);
        assert_eq!(history.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut history = BoundedHistory::new(3);
        for i in 0..5 {
            history.push(i);
        }

        assert_eq!(history.to_vec(), vec![2, 3, 4]);
        assert_eq!(history.latest(), Some(&4));
    }

    #[test]
    fn test_default_capacity_never_exceeded() {
        let mut history = BoundedHistory::default();
        for i in 0..500 {
            history.push(i);
            assert!(history.len() <= DEFAULT_HISTORY_CAPACITY);
        }
        assert_eq!(history.len(), 50);
        assert_eq!(history.iter().next(), Some(&450));
    }

    #[test]
    fn test_trim_to_keeps_newest() {
        let mut history = BoundedHistory::new(10);
        for i in 0..8 {
            history.push(i);
        }
        history.trim_to(3);

        assert_eq!(history.to_vec(), vec![5, 6, 7]);
    }

    #[test]
    fn test_stats() {
        let mut history = BoundedHistory::new(2);
        history.push('a');
        history.push('b');
        history.push('c');
        history.clear();

        let stats = history.stats();
        assert_eq!(stats.current_count, 0);
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.total_received, 3);
        assert_eq!(stats.total_dropped, 3);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut history = BoundedHistory::new(0);
        history.push("x");
        history.push("y");
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.to_vec(), vec!["y"]);
    }
}
