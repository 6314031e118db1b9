//! Priority queue of not-yet-processed events, ordered by resolved
//! `event_time` and, within a tie, by insertion order (spec §3.2).
//!
//! Time resolution itself (walking `Event::resolve_time` against a
//! dependency's completion) happens one layer up, in `evalsim-runtime`'s
//! `Environment`, once a dependency actually completes — this queue only
//! ever holds events that already know when they are eligible to run.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{EngineError, EngineResult};
use crate::event::Event;

#[derive(Debug)]
struct QueueEntry {
    time: f64,
    seq: u64,
    event_id: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // NaN never legitimately appears (TimeManager rejects negative
        // offsets and scenario authors supply finite times); fall back to
        // `Equal` rather than panicking if it ever does.
        self.time
            .partial_cmp(&other.time)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-heap of pending events keyed by `(event_time, insertion_seq)`.
pub struct EventQueue {
    heap: BinaryHeap<std::cmp::Reverse<QueueEntry>>,
    events: HashMap<String, Event>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            events: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `event` to become eligible at `time`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyExists`] if an event with this id is
    /// already pending — event ids are assigned once, at construction,
    /// and never reused within a run.
    pub fn put(&mut self, event: Event, time: f64) -> EngineResult<()> {
        if self.events.contains_key(&event.event_id) {
            return Err(EngineError::AlreadyExists(event.event_id.clone()));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(std::cmp::Reverse(QueueEntry {
            time,
            seq,
            event_id: event.event_id.clone(),
        }));
        self.events.insert(event.event_id.clone(), event);
        Ok(())
    }

    /// Pop every event eligible at or before `now`, in `(time, seq)` order.
    pub fn pop_events_to_process(&mut self, now: f64) -> Vec<Event> {
        let mut ready = Vec::new();
        while let Some(std::cmp::Reverse(entry)) = self.heap.peek() {
            if entry.time > now {
                break;
            }
            let std::cmp::Reverse(entry) = self.heap.pop().unwrap();
            if let Some(event) = self.events.remove(&entry.event_id) {
                ready.push(event);
            }
        }
        ready
    }

    /// The resolved time of the next pending event, if any — used by the
    /// queue-based loop and by `wait_for_notification`'s time-jump
    /// computation.
    pub fn peek_time(&self) -> Option<f64> {
        self.heap.peek().map(|std::cmp::Reverse(entry)| entry.time)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.events.contains_key(event_id)
    }

    /// Every event still queued, in no particular order — used by final
    /// checks at loop exit to find still-live `Validation` events the
    /// heap hasn't popped yet (spec §4.4's "the queue must contain no
    /// non-expired ValidationEvents").
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
