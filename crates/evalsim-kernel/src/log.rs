//! Append-only record of every event that has completed (spec §3.3, §6).

use crate::event::CompletedEvent;

/// The full execution history of one run. Entries are appended in
/// completion order (not necessarily `event_time` order, since
/// [`crate::queue::EventQueue`] can release several eligible events from
/// the same tick in arbitrary sub-order).
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<CompletedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, event: CompletedEvent) {
        self.entries.push(event);
    }

    pub fn get(&self, event_id: &str) -> Option<&CompletedEvent> {
        // Later entries win: an event id should never repeat, but last-write
        // wins keeps this resilient to a scenario bug rather than panicking.
        self.entries.iter().rev().find(|e| e.event_id == event_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompletedEvent> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[CompletedEvent] {
        &self.entries
    }
}
