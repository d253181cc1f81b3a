//! Timer heap for delayed submissions.
//!
//! A small min-heap of `(deadline, slot)` pairs shared by the thread
//! pool's timer thread and the lab pool's virtual clock. Cancellation
//! empties the slot in place; the heap entry stays behind and is
//! skipped when its deadline comes up.

use crate::pool::Work;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Shared slot holding a not-yet-fired delayed work item.
///
/// The scheduling side fills it, the cancel token empties it, the
/// firing side takes whatever is left.
pub(crate) type TimerSlot = Arc<Mutex<Option<Work>>>;

struct TimerEntry<D> {
    deadline: D,
    generation: u64,
    slot: TimerSlot,
}

impl<D: Ord> Ord for TimerEntry<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first);
        // generation breaks ties in insertion order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl<D: Ord> PartialOrd for TimerEntry<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: Ord> PartialEq for TimerEntry<D> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl<D: Ord> Eq for TimerEntry<D> {}

/// A min-heap of timer slots ordered by deadline.
///
/// Generic over the deadline type: the thread pool uses `Instant`, the
/// lab pool a virtual `Duration` offset.
pub(crate) struct TimerHeap<D> {
    heap: BinaryHeap<TimerEntry<D>>,
    next_generation: u64,
}

impl<D: Ord + Copy> TimerHeap<D> {
    /// Creates a new empty timer heap.
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_generation: 0,
        }
    }

    /// Returns the number of entries in the heap, live or cancelled.
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Adds a slot with the given deadline.
    pub(crate) fn insert(&mut self, deadline: D, slot: TimerSlot) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
            slot,
        });
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<D> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops all slots whose deadline is `<= now`, in deadline order.
    pub(crate) fn pop_expired(&mut self, now: D) -> Vec<TimerSlot> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline <= now {
                if let Some(entry) = self.heap.pop() {
                    expired.push(entry.slot);
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        expired
    }
}
