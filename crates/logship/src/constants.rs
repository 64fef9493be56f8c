//! Protocol limits and scheduler defaults.
//!
//! The ingestion API charges a fixed overhead per record and bounds both the
//! size and the entry count of a single upload call. The constants here keep
//! the sink's batches inside those bounds and set the cadence of the
//! scheduler loop.

use std::time::Duration;

/// Fixed per-event overhead, in bytes, charged by the ingestion protocol on
/// top of the UTF-8 message payload. Batch byte accounting uses
/// `message.len() + EVENT_OVERHEAD_BYTES`, never the raw string length alone.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

/// Maximum cumulative serialized size of a single upload call (uncompressed).
///
/// Uploads exceeding this size are rejected by the remote side, so
/// `batch_size` may not be configured above it.
pub const MAX_BATCH_BYTES: usize = 1_024 * 1_024;

/// Maximum number of events per upload call.
pub const MAX_BATCH_COUNT: usize = 10_000;

/// Default maximum age of an open batch before a time-based flush.
pub const DEFAULT_BUFFER_DURATION_MS: u64 = 10_000;

/// Upper bound on the scheduler's idle wait between ingress polls.
///
/// The effective wait is clamped to half the configured buffer duration so a
/// time-based flush never lags its deadline by more than one poll.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Handoff-queue depth past which the scheduler warns that the publisher is
/// falling behind. The queue itself stays unbounded; this is visibility only.
pub const HANDOFF_HIGH_WATERMARK: usize = 64;

/// Attempts the default HTTP client makes per upload before giving up.
pub const PUBLISH_RETRY_COUNT: u32 = 3;

/// Base delay between upload retries; attempt `n` waits `n` times this.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Per-request timeout for the default HTTP client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
