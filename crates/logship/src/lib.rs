//! # logship
//!
//! A buffering, batching sink that decouples producers of timestamped log
//! events from a remote, rate- and size-limited log-ingestion API.
//!
//! Producers submit events through a non-blocking entry point; a background
//! scheduler task accumulates them into bounded batches and hands finished
//! batches to a publisher task, which uploads them while renewing the
//! stream's sequencing token. Batches close when they fill up by count or
//! byte size, or when they outlive the configured buffer duration.
//!
//! ## Modules
//!
//! - [`sink`]: the scheduler loop, producer handles, and lifecycle
//! - [`batch`]: the bounded batch accumulator
//! - [`client`]: the ingestion-client contract and default HTTP client
//! - [`handler`]: a [`log::Log`] adapter feeding a sink
//!
//! ## Example
//!
//! ```rust,ignore
//! use logship::{LogEvent, LogSink, SinkConfig};
//!
//! let mut sink = LogSink::start(SinkConfig {
//!     group_name: "payments".into(),
//!     stream_name: "api-1".into(),
//!     endpoint: "https://ingest.example.com".into(),
//!     ..SinkConfig::default()
//! })
//! .await?;
//!
//! sink.add_event(LogEvent::new(1_700_000_000_000, "hello"));
//! sink.shutdown().await?;
//! ```
//!
//! ## Guarantees
//!
//! Events from a single producer reach the remote side in submission order,
//! partitioned into batches whose concatenation equals the submitted
//! sequence. The queues are in-memory only: delivery is at-most-once across
//! process crashes, and unflushed events do not survive the process.

#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod batch;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod handler;
mod publisher;
pub mod sink;

pub use client::{ClientError, HttpIngestClient, IngestClient, StreamDescription};
pub use config::SinkConfig;
pub use error::SinkError;
pub use event::LogEvent;
pub use handler::SinkLogHandler;
pub use sink::{LogSink, SinkHandle};
