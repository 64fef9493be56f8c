//! Event batch accumulator.
//!
//! An [`EventBatch`] collects events in insertion order (which is the wire
//! order) until it is full by count, full by size, or older than the
//! configured buffer duration. The accumulator only decides fullness; the
//! scheduler in [`crate::sink`] decides when to hand a batch off for
//! publishing.

use std::time::Duration;

use tokio::time::Instant;

use crate::event::LogEvent;

/// Size, count, and age bounds for one batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    /// Maximum number of events per batch.
    pub max_count: usize,
    /// Maximum cumulative serialized size per batch, in bytes.
    pub max_bytes: usize,
    /// Maximum age of an open batch before a time-based flush.
    pub max_age: Duration,
}

/// An ordered, bounded group of events destined for one upload call.
///
/// Exactly one batch is open per sink at a time; it is owned by the scheduler
/// task while open and becomes immutable once handed to the publisher.
#[derive(Debug)]
pub struct EventBatch {
    events: Vec<LogEvent>,
    byte_size: usize,
    created_at: Instant,
    limits: BatchLimits,
    force_publish: bool,
}

impl EventBatch {
    /// Creates an empty batch. The scheduler creates batches lazily on the
    /// first event, so `created_at` doubles as the first-add instant that
    /// age-based flushing is measured from.
    pub fn new(limits: BatchLimits) -> Self {
        EventBatch {
            events: Vec::new(),
            byte_size: 0,
            created_at: Instant::now(),
            limits,
            force_publish: false,
        }
    }

    /// Attempts to append `event`, preserving insertion order.
    ///
    /// Returns the event back unchanged when appending would push the batch
    /// past its count or byte limit; the batch itself is not mutated in that
    /// case. The caller is expected to flush and retry against a fresh batch.
    pub fn add(&mut self, event: LogEvent) -> Result<(), LogEvent> {
        if self.events.len() >= self.limits.max_count
            || self.byte_size + event.wire_size() > self.limits.max_bytes
        {
            return Err(event);
        }
        self.byte_size += event.wire_size();
        self.events.push(event);
        Ok(())
    }

    /// True when the batch is full by count or size, or its age has exceeded
    /// the buffer duration.
    pub fn should_flush(&self, now: Instant) -> bool {
        self.is_full() || now.duration_since(self.created_at) > self.limits.max_age
    }

    fn is_full(&self) -> bool {
        self.events.len() >= self.limits.max_count || self.byte_size >= self.limits.max_bytes
    }

    /// Marks the batch for immediate publishing. Sticky: once set it stays
    /// set, no matter who flushes the batch afterwards.
    pub fn mark_forced(&mut self) {
        self.force_publish = true;
    }

    pub fn is_forced(&self) -> bool {
        self.force_publish
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Cumulative serialized size of the batch, in bytes.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    /// Consumes the batch, yielding its events in wire order.
    pub fn into_events(self) -> Vec<LogEvent> {
        self.events
    }
}
