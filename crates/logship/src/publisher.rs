//! Batch publisher task.
//!
//! One publisher task runs per sink, blocking on the handoff queue and
//! uploading each batch with the stream's current sequencing token. Tokens
//! are monotonic per stream: every successful upload returns the token the
//! next upload must present, so the publisher is the only holder of the
//! cursor while the sink is alive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batch::EventBatch;
use crate::client::IngestClient;

pub(crate) struct BatchPublisher {
    pub(crate) rx: mpsc::UnboundedReceiver<EventBatch>,
    pub(crate) client: Arc<dyn IngestClient>,
    pub(crate) group_name: String,
    pub(crate) stream_name: String,
    pub(crate) sequence_token: Option<String>,
    /// Set by the scheduler after it has force-flushed its final batch.
    pub(crate) stop: CancellationToken,
    /// Set when the scheduler fails; exit without draining.
    pub(crate) group_stop: CancellationToken,
    pub(crate) pending: Arc<AtomicUsize>,
}

impl BatchPublisher {
    pub(crate) async fn run(mut self) {
        debug!(stream = %self.stream_name, "batch publisher started");
        loop {
            tokio::select! {
                maybe_batch = self.rx.recv() => match maybe_batch {
                    Some(batch) => self.publish(batch).await,
                    None => break,
                },
                () = self.stop.cancelled() => {
                    // The scheduler has already queued everything it will
                    // ever queue; drain what is left, then exit.
                    while let Ok(batch) = self.rx.try_recv() {
                        self.publish(batch).await;
                    }
                    break;
                }
                () = self.group_stop.cancelled() => {
                    warn!(stream = %self.stream_name, "group stop observed, publisher exiting");
                    break;
                }
            }
        }
        debug!(stream = %self.stream_name, "batch publisher stopped");
    }

    async fn publish(&mut self, batch: EventBatch) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        if batch.is_empty() {
            return;
        }
        let forced = batch.is_forced();
        let events = batch.into_events();
        debug!(count = events.len(), forced, "publishing batch");
        match self
            .client
            .put_events(
                &self.group_name,
                &self.stream_name,
                &events,
                self.sequence_token.as_deref(),
            )
            .await
        {
            Ok(next_token) => self.sequence_token = next_token,
            Err(e) => {
                // Retries already happened inside the client; at this point
                // the batch is undeliverable.
                error!(error = %e, count = events.len(), "failed to publish batch, dropping it");
            }
        }
    }
}

/// Looks up the stream's current sequencing token at sink construction.
///
/// The remote side matches streams by prefix, so the result is filtered down
/// to the exact stream name before any token is trusted. Lookup failures and
/// unknown streams both degrade to "no token"; the first upload establishes
/// the cursor in that case.
pub(crate) async fn bootstrap_sequence_token(
    client: &dyn IngestClient,
    group: &str,
    stream: &str,
) -> Option<String> {
    match client.describe_streams(group, stream).await {
        Ok(streams) => streams
            .into_iter()
            .find(|s| s.stream_name == stream)
            .and_then(|s| s.sequence_token),
        Err(e) => {
            debug!(error = %e, stream, "sequence token lookup failed, starting without one");
            None
        }
    }
}
