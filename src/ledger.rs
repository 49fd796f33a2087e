//! Duplicate-ID ledger.
//!
//! Remembers the ids of the most recently admitted commands so a redelivered
//! command is dispatched only once. Insertion order decides eviction: when the
//! ledger is full the oldest id is forgotten.

use std::collections::{HashSet, VecDeque};

/// Bounded, insertion-ordered set of command ids.
#[derive(Debug)]
pub struct DuplicateLedger {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DuplicateLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Record `id`; returns `true` if it was already present (a duplicate).
    ///
    /// Duplicates do not refresh their position.
    pub fn check_and_record(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return true;
        }

        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
