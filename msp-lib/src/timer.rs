//! Single-shot timers for pending requests.
//!
//! One min-heap holds every armed deadline. Cancelling only forgets the key;
//! stale heap entries are skipped when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Handle for one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct DelayQueue<T> {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    armed: HashMap<TimerId, T>,
    next_id: u64,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer that fires once at `deadline`.
    pub fn insert(&mut self, deadline: Instant, value: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse((deadline, id)));
        self.armed.insert(id, value);
        id
    }

    /// Disarm a timer. Returns its value if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.armed.remove(&id)
    }

    /// Earliest deadline still armed.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop one timer whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, T)> {
        self.discard_stale();
        let due = matches!(self.heap.peek(), Some(Reverse((deadline, _))) if *deadline <= now);
        if !due {
            return None;
        }
        let Reverse((_, id)) = self.heap.pop()?;
        self.armed.remove(&id).map(|value| (id, value))
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.armed.clear();
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.armed.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}
