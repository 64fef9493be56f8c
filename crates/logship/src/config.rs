//! Sink construction parameters.

use std::time::Duration;

use crate::batch::BatchLimits;
use crate::constants::{
    DEFAULT_BUFFER_DURATION_MS, EVENT_OVERHEAD_BYTES, MAX_BATCH_BYTES, MAX_BATCH_COUNT,
};
use crate::error::SinkError;

/// Configuration for one log sink (one group + stream destination).
///
/// Numeric limits default to the protocol maxima; names and the endpoint have
/// no sensible defaults and must be filled in before [`validate`] passes.
///
/// [`validate`]: SinkConfig::validate
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Destination log group.
    pub group_name: String,
    /// Destination stream within the group.
    pub stream_name: String,
    /// Maximum age, in milliseconds, an open batch may reach before being
    /// flushed regardless of fullness.
    pub buffer_duration_ms: u64,
    /// Maximum events per batch.
    pub batch_count: usize,
    /// Maximum serialized bytes per batch (message bytes plus per-event
    /// overhead).
    pub batch_size: usize,
    /// Base URL of the ingestion endpoint, used by the default HTTP client.
    pub endpoint: String,
    /// API key the default HTTP client sends with each request.
    pub api_key: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            group_name: String::new(),
            stream_name: String::new(),
            buffer_duration_ms: DEFAULT_BUFFER_DURATION_MS,
            batch_count: MAX_BATCH_COUNT,
            batch_size: MAX_BATCH_BYTES,
            endpoint: String::new(),
            api_key: None,
        }
    }
}

impl SinkConfig {
    /// Rejects configurations the remote side would refuse or the scheduler
    /// cannot operate with. Called by the sink before any task spawns, so
    /// configuration errors surface at construction rather than at runtime.
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.group_name.is_empty() {
            return Err(SinkError::InvalidConfig("group_name is empty".into()));
        }
        if self.stream_name.is_empty() {
            return Err(SinkError::InvalidConfig("stream_name is empty".into()));
        }
        if self.endpoint.is_empty() {
            return Err(SinkError::InvalidConfig("endpoint is empty".into()));
        }
        if self.buffer_duration_ms == 0 {
            return Err(SinkError::InvalidConfig(
                "buffer_duration_ms must be at least 1".into(),
            ));
        }
        if self.batch_count == 0 || self.batch_count > MAX_BATCH_COUNT {
            return Err(SinkError::InvalidConfig(format!(
                "batch_count must be between 1 and {MAX_BATCH_COUNT}, got {}",
                self.batch_count
            )));
        }
        if self.batch_size <= EVENT_OVERHEAD_BYTES || self.batch_size > MAX_BATCH_BYTES {
            return Err(SinkError::InvalidConfig(format!(
                "batch_size must be between {} and {MAX_BATCH_BYTES}, got {}",
                EVENT_OVERHEAD_BYTES + 1,
                self.batch_size
            )));
        }
        Ok(())
    }

    pub(crate) fn limits(&self) -> BatchLimits {
        BatchLimits {
            max_count: self.batch_count,
            max_bytes: self.batch_size,
            max_age: Duration::from_millis(self.buffer_duration_ms),
        }
    }
}
