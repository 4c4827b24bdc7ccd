use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashSet},
};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    SearchTick,
    SearchTimeout,
    SimulatedMatch,
    SimulatedArrival,
    SimulatedCompletion,
    TerminalDisplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline: DateTime<Utc>,
    id: TimerId,
    kind: TimerKind,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap yields the earliest deadline, oldest timer first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cancellable one-shot timers. Nothing fires on its own; the owner drains
/// expired entries with [`TimerQueue::pop_due`].
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    heap: BinaryHeap<Entry>,
    live: HashSet<TimerId>,
}

impl TimerQueue {
    pub fn schedule(&mut self, deadline: DateTime<Utc>, kind: TimerKind) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.heap.push(Entry { deadline, id, kind });
        self.live.insert(id);
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.live.remove(&id)
    }

    pub fn cancel_all(&mut self) {
        self.live.clear();
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.discard_tombstones();
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Removes and returns the earliest live timer whose deadline is `<= now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(TimerId, TimerKind)> {
        self.discard_tombstones();
        let entry = self.heap.peek()?;
        if entry.deadline > now {
            return None;
        }
        let entry = self.heap.pop()?;
        self.live.remove(&entry.id);
        Some((entry.id, entry.kind))
    }

    fn discard_tombstones(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.live.contains(&entry.id) {
                break;
            }
            self.heap.pop();
        }
    }
}
