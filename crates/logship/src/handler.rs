//! Host logging-framework adapter.
//!
//! [`SinkLogHandler`] implements [`log::Log`], turning each record into a
//! [`LogEvent`] stamped with the current time in integer milliseconds and
//! forwarding it to a [`LogSink`]. Each event is chained to the previous
//! event this handler produced, so the remote side can reconstruct
//! per-producer ordering.
//!
//! `log::Log` has no close hook; hosts call [`SinkLogHandler::shutdown`]
//! before exiting to drain the sink.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Metadata, Record};

use crate::error::SinkError;
use crate::event::LogEvent;
use crate::sink::{LogSink, SinkHandle};

pub struct SinkLogHandler {
    /// Kept only for shutdown; the hot path goes through `handle`.
    sink: Mutex<Option<LogSink>>,
    handle: SinkHandle,
    prev: Mutex<Option<Arc<LogEvent>>>,
    level: LevelFilter,
}

impl SinkLogHandler {
    #[must_use]
    pub fn new(sink: LogSink, level: LevelFilter) -> Self {
        let handle = sink.handle();
        SinkLogHandler {
            sink: Mutex::new(Some(sink)),
            handle,
            prev: Mutex::new(None),
            level,
        }
    }

    /// Drains and stops the underlying sink. Records logged after this call
    /// are dropped.
    pub async fn shutdown(&self) -> Result<(), SinkError> {
        let taken = self.sink.lock().expect("lock poisoned").take();
        match taken {
            Some(mut sink) => sink.shutdown().await,
            None => Err(SinkError::AlreadyShutDown),
        }
    }
}

impl log::Log for SinkLogHandler {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = now_millis();
        let message = record.args().to_string();
        let event = {
            let mut prev = self.prev.lock().expect("lock poisoned");
            let event = match prev.as_ref() {
                Some(last) => LogEvent::with_prev(timestamp, message, last),
                None => LogEvent::new(timestamp, message),
            };
            *prev = Some(Arc::new(event.clone()));
            event
        };
        self.handle.add_event(event);
    }

    fn flush(&self) {
        // The sink flushes on its own schedule; nothing to do synchronously.
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
