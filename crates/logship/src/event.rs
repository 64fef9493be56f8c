//! The timestamped log event flowing through the sink.

use std::sync::{Arc, Weak};

use crate::constants::EVENT_OVERHEAD_BYTES;

/// A single immutable log event.
///
/// Events carry a millisecond timestamp, a message, and an optional weak link
/// to the previous event from the same producer. The link exists only so the
/// remote side can derive ordering-dependent metadata; nothing in this crate
/// dereferences it.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The formatted log line.
    pub message: String,
    prev: Option<Weak<LogEvent>>,
}

impl LogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        LogEvent {
            timestamp,
            message: message.into(),
            prev: None,
        }
    }

    /// Creates an event chained to the producer's previous event.
    pub fn with_prev(timestamp: i64, message: impl Into<String>, prev: &Arc<LogEvent>) -> Self {
        LogEvent {
            timestamp,
            message: message.into(),
            prev: Some(Arc::downgrade(prev)),
        }
    }

    /// The previous-event link, if the producer chained one.
    pub fn prev(&self) -> Option<Weak<LogEvent>> {
        self.prev.clone()
    }

    /// Serialized size the ingestion protocol charges for this event:
    /// message bytes plus the fixed per-event overhead.
    pub fn wire_size(&self) -> usize {
        self.message.len() + EVENT_OVERHEAD_BYTES
    }
}

// The prev link is opaque payload; two events with the same timestamp and
// message compare equal regardless of chaining.
impl PartialEq for LogEvent {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.message == other.message
    }
}

impl Eq for LogEvent {}
