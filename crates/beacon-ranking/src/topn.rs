//! Bounded top-N selection.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Keeps the `capacity` greatest items pushed so far.
///
/// Backed by a min-heap: once full, a new item replaces the current minimum
/// only if it is strictly greater, so among equal items the earliest pushed
/// are kept.
#[derive(Debug)]
pub struct TopN<T: Ord> {
    heap: BinaryHeap<Reverse<T>>,
    capacity: usize,
}

impl<T: Ord> TopN<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
        }
    }

    /// Offer an item. Returns whether it was kept.
    pub fn push(&mut self, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(item));
            return true;
        }

        let beats_min = matches!(self.heap.peek(), Some(Reverse(min)) if item > *min);
        if beats_min {
            self.heap.pop();
            self.heap.push(Reverse(item));
        }
        beats_min
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Smallest item kept.
    pub fn min(&self) -> Option<&T> {
        self.heap.peek().map(|Reverse(item)| item)
    }

    /// Kept items, greatest first.
    pub fn into_sorted_desc(self) -> Vec<T> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(item)| item)
            .collect()
    }
}
