//! The batching sink: producer handoff, flush scheduling, lifecycle.
//!
//! One [`LogSink`] owns the pipeline for a single group + stream destination:
//!
//! ```text
//!    ┌──────────────┐
//!    │  Producers   │  add_event (never blocks)
//!    └──────┬───────┘
//!           │ ingress queue (unbounded mpsc)
//!           v
//!    ┌──────────────┐
//!    │  Scheduler   │  fills the open batch, decides flush timing
//!    └──────┬───────┘
//!           │ publish handoff queue (unbounded mpsc)
//!           v
//!    ┌──────────────┐
//!    │  Publisher   │  uploads, renews the sequencing token
//!    └──────────────┘
//! ```
//!
//! The two queues are the only synchronization points. The open batch is
//! touched by the scheduler task alone, and a batch handed to the publisher
//! is never touched by the scheduler again.
//!
//! # Shutdown
//!
//! [`LogSink::shutdown`] cancels the scheduler's stop token and waits. The
//! scheduler drains the ingress queue, force-flushes its final (possibly
//! partial) batch, and cancels the publisher's stop token on the way out; the
//! publisher then drains the handoff queue and terminates. No event accepted
//! before `shutdown` was called is lost. Dropping the sink without calling
//! `shutdown` closes the ingress queue, which drains the pipeline the same
//! way, but nothing awaits completion in that case.
//!
//! # Failure
//!
//! A scheduler failure cancels a shared group-stop token so the publisher
//! never runs on orphaned, and the error is returned from `shutdown`. The
//! sink is permanently unusable afterwards; [`LogSink::failure_signal`] lets
//! the owner observe the fault without waiting for shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchLimits, EventBatch};
use crate::client::{HttpIngestClient, IngestClient};
use crate::config::SinkConfig;
use crate::constants::{HANDOFF_HIGH_WATERMARK, POLL_INTERVAL};
use crate::error::SinkError;
use crate::event::LogEvent;
use crate::publisher::{bootstrap_sequence_token, BatchPublisher};

/// Cloneable producer-side handle. Sends are fire-and-forget and never block.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl SinkHandle {
    pub fn add_event(&self, event: LogEvent) {
        if self.tx.send(event).is_err() {
            debug!("event submitted after sink shutdown, dropping it");
        }
    }
}

/// A buffering, batching sink for one log stream.
pub struct LogSink {
    ingress_tx: mpsc::UnboundedSender<LogEvent>,
    shutdown: CancellationToken,
    group_stop: CancellationToken,
    scheduler: Option<JoinHandle<Result<(), SinkError>>>,
    publisher: Option<JoinHandle<()>>,
}

impl LogSink {
    /// Starts a sink using the default HTTP ingestion client built from the
    /// configured endpoint and API key.
    pub async fn start(config: SinkConfig) -> Result<Self, SinkError> {
        let client = Arc::new(HttpIngestClient::new(
            config.endpoint.clone(),
            config.api_key.clone(),
        ));
        Self::start_with_client(config, client).await
    }

    /// Starts a sink with an injected ingestion client.
    ///
    /// Validates the configuration, bootstraps the stream's sequencing token
    /// (failures degrade to "no token"), then spawns the publisher and
    /// scheduler tasks.
    pub async fn start_with_client(
        config: SinkConfig,
        client: Arc<dyn IngestClient>,
    ) -> Result<Self, SinkError> {
        config.validate()?;

        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let publisher_stop = CancellationToken::new();
        let group_stop = CancellationToken::new();
        let pending = Arc::new(AtomicUsize::new(0));

        let sequence_token =
            bootstrap_sequence_token(client.as_ref(), &config.group_name, &config.stream_name)
                .await;

        let publisher = BatchPublisher {
            rx: publish_rx,
            client,
            group_name: config.group_name.clone(),
            stream_name: config.stream_name.clone(),
            sequence_token,
            stop: publisher_stop.clone(),
            group_stop: group_stop.clone(),
            pending: Arc::clone(&pending),
        };
        let publisher_handle = tokio::spawn(publisher.run());

        let scheduler = Scheduler {
            ingress_rx,
            publish_tx,
            batch: None,
            limits: config.limits(),
            poll_interval: poll_interval_for(&config),
            shutdown: shutdown.clone(),
            publisher_stop,
            group_stop: group_stop.clone(),
            pending,
        };
        let scheduler_handle = tokio::spawn(scheduler.run());

        info!(
            group = %config.group_name,
            stream = %config.stream_name,
            "log sink started"
        );

        Ok(LogSink {
            ingress_tx,
            shutdown,
            group_stop,
            scheduler: Some(scheduler_handle),
            publisher: Some(publisher_handle),
        })
    }

    /// Submits an event. Fire-and-forget: never blocks, never fails for a
    /// well-formed event. Events submitted after shutdown are dropped.
    pub fn add_event(&self, event: LogEvent) {
        if self.ingress_tx.send(event).is_err() {
            debug!("event submitted after sink shutdown, dropping it");
        }
    }

    /// Returns a cloneable handle for producers that outlive this reference.
    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            tx: self.ingress_tx.clone(),
        }
    }

    /// Token cancelled when the scheduler fails. Owners can watch it to stop
    /// routing records to a dead sink.
    pub fn failure_signal(&self) -> CancellationToken {
        self.group_stop.clone()
    }

    /// Gracefully stops the sink.
    ///
    /// Blocks until the scheduler has drained the ingress queue and
    /// force-flushed its final batch, then until the publisher has drained
    /// the handoff queue. Returns the scheduler's failure if it had one.
    /// A second call returns [`SinkError::AlreadyShutDown`].
    pub async fn shutdown(&mut self) -> Result<(), SinkError> {
        let scheduler = self.scheduler.take().ok_or(SinkError::AlreadyShutDown)?;
        info!("log sink shutting down gracefully");
        self.shutdown.cancel();

        let result = match scheduler.await {
            Ok(result) => result,
            Err(join_error) => {
                // Scheduler died without running its exit path; release the
                // publisher through the group stop so the drain below ends.
                self.group_stop.cancel();
                Err(SinkError::Scheduler(join_error.to_string()))
            }
        };

        if let Some(publisher) = self.publisher.take() {
            if publisher.await.is_err() {
                warn!("publisher task panicked during drain");
            }
        }
        info!("log sink shutdown complete");
        result
    }
}

fn poll_interval_for(config: &SinkConfig) -> Duration {
    // Keep the idle wait at or under half the buffer duration so time-based
    // flushes are never observed more than one poll late.
    POLL_INTERVAL.min(Duration::from_millis((config.buffer_duration_ms / 2).max(1)))
}

struct Scheduler {
    ingress_rx: mpsc::UnboundedReceiver<LogEvent>,
    publish_tx: mpsc::UnboundedSender<EventBatch>,
    /// The one open batch, created lazily on the first event.
    batch: Option<EventBatch>,
    limits: BatchLimits,
    poll_interval: Duration,
    shutdown: CancellationToken,
    publisher_stop: CancellationToken,
    group_stop: CancellationToken,
    pending: Arc<AtomicUsize>,
}

impl Scheduler {
    async fn run(mut self) -> Result<(), SinkError> {
        debug!("sink scheduler started");
        let result = self.drive().await;
        if let Err(e) = &result {
            error!(error = %e, "sink scheduler failed");
            self.group_stop.cancel();
        }
        debug!("asking publisher to shut down");
        self.publisher_stop.cancel();
        result
    }

    async fn drive(&mut self) -> Result<(), SinkError> {
        loop {
            match self.ingress_rx.try_recv() {
                Ok(event) => self.accept(event)?,
                Err(TryRecvError::Empty) => {
                    if self.shutdown.is_cancelled() {
                        self.flush(true)?;
                        return Ok(());
                    }
                    tokio::select! {
                        () = self.shutdown.cancelled() => {}
                        () = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    // Every producer handle is gone; nothing more can arrive.
                    self.flush(true)?;
                    return Ok(());
                }
            }
            self.flush(false)?;
        }
    }

    fn accept(&mut self, event: LogEvent) -> Result<(), SinkError> {
        let batch = self
            .batch
            .get_or_insert_with(|| EventBatch::new(self.limits));
        if let Err(event) = batch.add(event) {
            self.flush(true)?;
            let mut fresh = EventBatch::new(self.limits);
            match fresh.add(event) {
                Ok(()) => self.batch = Some(fresh),
                Err(event) => {
                    error!(
                        bytes = event.wire_size(),
                        max_bytes = self.limits.max_bytes,
                        "event exceeds the maximum batch size, dropping it"
                    );
                }
            }
        }
        Ok(())
    }

    /// Hands the open batch to the publisher when `force` is set or the batch
    /// reports itself flush-due. Ownership transfers at the send; the batch
    /// slot is left empty either way.
    fn flush(&mut self, force: bool) -> Result<(), SinkError> {
        let due = self
            .batch
            .as_ref()
            .is_some_and(|batch| force || batch.should_flush(Instant::now()));
        if !due {
            return Ok(());
        }
        if let Some(mut batch) = self.batch.take() {
            if force {
                batch.mark_forced();
            }
            let depth = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
            if depth > HANDOFF_HIGH_WATERMARK {
                warn!(depth, "publish queue is backing up, publisher may be stalled");
            }
            self.publish_tx
                .send(batch)
                .map_err(|_| SinkError::PublisherUnavailable)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::{ClientError, StreamDescription};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    struct PublishCall {
        events: Vec<LogEvent>,
        token: Option<String>,
    }

    struct RecordingClient {
        streams: Vec<StreamDescription>,
        calls: Mutex<Vec<PublishCall>>,
    }

    impl RecordingClient {
        fn new(streams: Vec<StreamDescription>) -> Arc<Self> {
            Arc::new(RecordingClient {
                streams,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn messages(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|call| call.events.iter().map(|e| e.message.clone()).collect())
                .collect()
        }

        fn tokens(&self) -> Vec<Option<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|call| call.token.clone())
                .collect()
        }
    }

    #[async_trait]
    impl IngestClient for RecordingClient {
        async fn describe_streams(
            &self,
            _group: &str,
            _stream_prefix: &str,
        ) -> Result<Vec<StreamDescription>, ClientError> {
            Ok(self.streams.clone())
        }

        async fn put_events(
            &self,
            _group: &str,
            _stream: &str,
            events: &[LogEvent],
            sequence_token: Option<&str>,
        ) -> Result<Option<String>, ClientError> {
            let mut calls = self.calls.lock().unwrap();
            let call = calls.len() + 1;
            calls.push(PublishCall {
                events: events.to_vec(),
                token: sequence_token.map(str::to_owned),
            });
            Ok(Some(format!("token-{call}")))
        }
    }

    struct FailingClient;

    #[async_trait]
    impl IngestClient for FailingClient {
        async fn describe_streams(
            &self,
            _group: &str,
            _stream_prefix: &str,
        ) -> Result<Vec<StreamDescription>, ClientError> {
            Err(ClientError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            })
        }

        async fn put_events(
            &self,
            _group: &str,
            _stream: &str,
            _events: &[LogEvent],
            _sequence_token: Option<&str>,
        ) -> Result<Option<String>, ClientError> {
            Err(ClientError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            })
        }
    }

    fn stream(name: &str, token: &str) -> StreamDescription {
        StreamDescription {
            stream_name: name.to_string(),
            sequence_token: Some(token.to_string()),
        }
    }

    fn config() -> SinkConfig {
        SinkConfig {
            group_name: "app".to_string(),
            stream_name: "web-1".to_string(),
            endpoint: "https://ingest.example.com".to_string(),
            ..SinkConfig::default()
        }
    }

    fn events(n: usize) -> Vec<LogEvent> {
        (0..n)
            .map(|i| LogEvent::new(1_700_000_000_000 + i as i64, format!("Message {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_count_limit_splits_into_two_ordered_batches() {
        let client = RecordingClient::new(vec![stream("web-1", "initial-token")]);
        let mut sink_config = config();
        sink_config.batch_count = 50;
        let mut sink = LogSink::start_with_client(sink_config, client.clone())
            .await
            .unwrap();

        for event in events(100) {
            sink.add_event(event);
        }
        sink.shutdown().await.unwrap();

        let messages = client.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].len(), 50);
        assert_eq!(messages[1].len(), 50);
        let flat: Vec<&String> = messages.iter().flatten().collect();
        for (i, message) in flat.iter().enumerate() {
            assert_eq!(**message, format!("Message {i}"));
        }

        // First upload uses the bootstrapped token, the second the token
        // returned by the first.
        let tokens = client.tokens();
        assert_eq!(tokens[0].as_deref(), Some("initial-token"));
        assert_eq!(tokens[1].as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_partial_batch() {
        let client = RecordingClient::new(vec![]);
        let mut sink = LogSink::start_with_client(config(), client.clone())
            .await
            .unwrap();

        for event in events(3) {
            sink.add_event(event);
        }
        sink.shutdown().await.unwrap();

        let messages = client.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0],
            vec!["Message 0", "Message 1", "Message 2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_duration_flushes_without_shutdown() {
        let client = RecordingClient::new(vec![]);
        let mut sink_config = config();
        sink_config.buffer_duration_ms = 500;
        let mut sink = LogSink::start_with_client(sink_config, client.clone())
            .await
            .unwrap();

        sink.add_event(LogEvent::new(1, "only one"));
        tokio::time::sleep(Duration::from_secs(4)).await;

        let messages = client.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], vec!["only one"]);

        // Nothing left to flush on shutdown; the event is not re-delivered.
        sink.shutdown().await.unwrap();
        assert_eq!(client.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_no_events_means_no_uploads() {
        let client = RecordingClient::new(vec![]);
        let mut sink = LogSink::start_with_client(config(), client.clone())
            .await
            .unwrap();

        sink.shutdown().await.unwrap();
        assert!(client.messages().is_empty());
    }

    #[tokio::test]
    async fn test_size_limit_splits_batches() {
        let client = RecordingClient::new(vec![]);
        let mut sink_config = config();
        // Room for two "0123456789" events (10 bytes + overhead each).
        sink_config.batch_size = 2 * (10 + crate::constants::EVENT_OVERHEAD_BYTES);
        let mut sink = LogSink::start_with_client(sink_config, client.clone())
            .await
            .unwrap();

        for i in 0..5 {
            sink.add_event(LogEvent::new(i, "0123456789"));
        }
        sink.shutdown().await.unwrap();

        let messages = client.messages();
        let sizes: Vec<usize> = messages.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_concatenation_preserves_submission_order() {
        let client = RecordingClient::new(vec![]);
        let mut sink_config = config();
        sink_config.batch_count = 7;
        let mut sink = LogSink::start_with_client(sink_config, client.clone())
            .await
            .unwrap();

        let submitted = events(200);
        for event in submitted.clone() {
            sink.add_event(event);
        }
        sink.shutdown().await.unwrap();

        let received: Vec<LogEvent> = client
            .calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|call| call.events.clone())
            .collect();
        assert_eq!(received, submitted);
    }

    #[tokio::test]
    async fn test_bootstrap_ignores_prefix_only_stream_match() {
        let client = RecordingClient::new(vec![
            stream("web-1-archive", "wrong-token"),
            stream("web-1", "right-token"),
        ]);
        let mut sink = LogSink::start_with_client(config(), client.clone())
            .await
            .unwrap();

        sink.add_event(LogEvent::new(1, "hello"));
        sink.shutdown().await.unwrap();

        assert_eq!(client.tokens()[0].as_deref(), Some("right-token"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_oversize_event_is_dropped_with_error() {
        let client = RecordingClient::new(vec![]);
        let mut sink_config = config();
        sink_config.batch_size = 100;
        let mut sink = LogSink::start_with_client(sink_config, client.clone())
            .await
            .unwrap();

        sink.add_event(LogEvent::new(1, "x".repeat(200)));
        sink.add_event(LogEvent::new(2, "fits"));
        sink.shutdown().await.unwrap();

        let messages = client.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], vec!["fits"]);
        assert!(logs_contain("event exceeds the maximum batch size"));
    }

    #[tokio::test]
    async fn test_add_event_after_shutdown_is_ignored() {
        let client = RecordingClient::new(vec![]);
        let mut sink = LogSink::start_with_client(config(), client.clone())
            .await
            .unwrap();

        sink.shutdown().await.unwrap();

        // Does not panic, does not deliver.
        sink.add_event(LogEvent::new(1, "too late"));
        assert!(client.messages().is_empty());

        // Second shutdown is a caller error.
        assert!(matches!(
            sink.shutdown().await,
            Err(SinkError::AlreadyShutDown)
        ));
    }

    #[tokio::test]
    async fn test_failing_uploads_do_not_block_shutdown() {
        let mut sink = LogSink::start_with_client(config(), Arc::new(FailingClient))
            .await
            .unwrap();

        for event in events(10) {
            sink.add_event(event);
        }
        // Batches are dropped by the publisher, but the pipeline drains.
        sink.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cloned_handles_feed_the_same_sink() {
        let client = RecordingClient::new(vec![]);
        let mut sink = LogSink::start_with_client(config(), client.clone())
            .await
            .unwrap();

        let handle = sink.handle();
        let task = tokio::spawn(async move {
            handle.add_event(LogEvent::new(1, "from task"));
        });
        task.await.unwrap();

        sink.add_event(LogEvent::new(2, "from owner"));
        sink.shutdown().await.unwrap();

        let received: usize = client.messages().iter().map(Vec::len).sum();
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_failure_signal_untouched_by_clean_shutdown() {
        let client = RecordingClient::new(vec![]);
        let mut sink = LogSink::start_with_client(config(), client.clone())
            .await
            .unwrap();
        let failure = sink.failure_signal();

        sink.shutdown().await.unwrap();
        assert!(!failure.is_cancelled());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_spawning() {
        let client = RecordingClient::new(vec![]);
        let mut bad = config();
        bad.batch_count = 0;

        let result = LogSink::start_with_client(bad, client).await;
        assert!(matches!(result, Err(SinkError::InvalidConfig(_))));
    }
}
