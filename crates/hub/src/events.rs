use serde::Serialize;
use std::collections::VecDeque;
use time::OffsetDateTime;

/// Default number of events retained in the log.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    System,
    Manual,
    Watering,
    Error,
    Light,
    Schedule,
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: OffsetDateTime,
    pub kind: EventKind,
    pub message: String,
}

/// Bounded audit log, newest entry at index 0. Once full, every append
/// evicts the oldest entry.
pub struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, event: Event) {
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    pub fn record(&mut self, timestamp: OffsetDateTime, kind: EventKind, message: impl Into<String>) {
        self.append(Event {
            timestamp,
            kind,
            message: message.into(),
        });
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.events.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
