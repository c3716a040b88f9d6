//! Bounded typed event log
//!
//! Every component reports lifecycle transitions, new bests and submission
//! outcomes here. The log is a FIFO ring: once `capacity` events are held,
//! the oldest is evicted. The UI bridge drains snapshots; nothing blocks on
//! a slow reader.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Warning,
    Best,
    Accepted,
    Rejected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub message: String,
}

/// Bounded FIFO of typed events.
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, kind: EventKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            EventKind::Warning => log::warn!("{message}"),
            EventKind::Error => log::error!("{message}"),
            _ => log::info!("{message}"),
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.len() == self.capacity {
            inner.pop_front();
        }
        inner.push_back(Event {
            timestamp: Utc::now(),
            kind,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(EventKind::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(EventKind::Warning, message);
    }

    pub fn best(&self, message: impl Into<String>) {
        self.push(EventKind::Best, message);
    }

    pub fn accepted(&self, message: impl Into<String>) {
        self.push(EventKind::Accepted, message);
    }

    pub fn rejected(&self, message: impl Into<String>) {
        self.push(EventKind::Rejected, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(EventKind::Error, message);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// All currently-held events, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.lock().unwrap().iter().cloned().collect()
    }

    /// Count of held events of one kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
