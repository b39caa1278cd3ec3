//! The future event set.
//!
//! Pending events are kept in a min-priority-queue keyed by timestamp. Events scheduled for the
//! same instant pop in the order they were scheduled.

use std::cmp::Reverse;
use std::hash::Hash;

use priority_queue::PriorityQueue;

use crate::time::SimTime;

pub(crate) struct FutureEventSet<K: Hash + Eq> {
    queue: PriorityQueue<K, Reverse<(SimTime, u64)>>,
    sequence: u64,
}

impl<K: Hash + Eq> FutureEventSet<K> {
    pub(crate) fn new() -> Self {
        FutureEventSet {
            queue: PriorityQueue::new(),
            sequence: 0,
        }
    }

    /// Schedules `key` at `at`, replacing any earlier entry for the same key.
    pub(crate) fn schedule(&mut self, key: K, at: SimTime) {
        if let Some(Reverse((current, _))) = self.queue.get_priority(&key) {
            if *current == at {
                return;
            }
        }
        self.sequence += 1;
        self.queue.push(key, Reverse((at, self.sequence)));
    }

    pub(crate) fn cancel(&mut self, key: &K) -> bool {
        self.queue.remove(key).is_some()
    }

    pub(crate) fn next_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|(_, Reverse((at, _)))| *at)
    }

    /// Removes and returns every entry due at or before `until`, earliest first.
    pub(crate) fn pop_until(&mut self, until: SimTime) -> Vec<K> {
        let mut due = Vec::new();
        while self.next_time().is_some_and(|at| at <= until) {
            if let Some((key, _)) = self.queue.pop() {
                due.push(key);
            }
        }
        due
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
