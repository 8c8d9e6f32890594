//! Events and the two FIFO queues (§3, §5): internal events strictly
//! precede external ones, and within each queue ordering is FIFO.

use std::collections::{HashMap, VecDeque};

#[cfg(feature = "persistence")]
use serde::{Deserialize, Serialize};

use crate::datamodel::DataValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(Serialize, Deserialize))]
pub enum EventKind {
    Internal,
    External,
    Platform,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "persistence", derive(Serialize, Deserialize))]
pub struct Event {
    pub name: String,
    pub kind: EventKind,
    pub sendid: Option<String>,
    pub origin: Option<String>,
    pub origin_type: Option<String>,
    pub invoke_id: Option<String>,
    pub data: HashMap<String, DataValue>,
}

impl Event {
    pub fn internal(name: impl Into<String>) -> Event {
        Event {
            name: name.into(),
            kind: EventKind::Internal,
            sendid: None,
            origin: None,
            origin_type: None,
            invoke_id: None,
            data: HashMap::new(),
        }
    }

    pub fn external(name: impl Into<String>) -> Event {
        Event {
            name: name.into(),
            kind: EventKind::External,
            sendid: None,
            origin: None,
            origin_type: None,
            invoke_id: None,
            data: HashMap::new(),
        }
    }

    pub fn platform(name: impl Into<String>) -> Event {
        Event {
            name: name.into(),
            kind: EventKind::Platform,
            sendid: None,
            origin: None,
            origin_type: None,
            invoke_id: None,
            data: HashMap::new(),
        }
    }

    pub fn error(category: &str, reason: &str) -> Event {
        if reason.is_empty() {
            Event::internal(format!("error.{}", category))
        } else {
            Event::internal(format!("error.{}.{}", category, reason))
        }
    }

    pub fn is_error(&self) -> bool {
        self.name.starts_with("error.")
    }

    pub fn is_abort(&self) -> bool {
        self.name.starts_with("abort")
    }

    pub fn done_state(parent_id: &str) -> Event {
        Event::internal(format!("done.state.{}", parent_id))
    }

    /// §4.2: empty descriptor never matches; a descriptor ending in `*` is
    /// a prefix match (on `.`-free text, matching the whole leading run);
    /// otherwise exact match.
    pub fn matches(descriptor: &str, event_name: &str) -> bool {
        if descriptor.is_empty() {
            return false;
        }
        if descriptor == "*" {
            return true;
        }
        if let Some(prefix) = descriptor.strip_suffix('*') {
            event_name == prefix || event_name.starts_with(prefix)
        } else {
            descriptor == event_name
        }
    }
}

/// Simple FIFO, used for the internal queue.
#[derive(Debug, Default)]
pub struct EventQueue {
    items: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> EventQueue {
        EventQueue::default()
    }

    pub fn enqueue(&mut self, event: Event) {
        self.items.push_back(event);
    }

    pub fn dequeue(&mut self) -> Option<Event> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn drain_into(&mut self, other: &mut EventQueue) {
        while let Some(e) = self.items.pop_front() {
            other.enqueue(e);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_prefix_match() {
        assert!(Event::matches("error.*", "error.execution"));
        assert!(Event::matches("error.*", "error."));
        assert!(!Event::matches("error.*", "err"));
    }

    #[test]
    fn exact_match() {
        assert!(Event::matches("next", "next"));
        assert!(!Event::matches("next", "nextish"));
    }

    #[test]
    fn empty_descriptor_never_matches() {
        assert!(!Event::matches("", "anything"));
    }
}
