/// Errors surfaced by the sink itself.
///
/// Upload failures are not represented here: retry, backoff, and token
/// conflict recovery belong to the ingestion client (see
/// [`crate::client::ClientError`]), and a batch the client cannot deliver is
/// logged and dropped rather than propagated to producers.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("publisher task is no longer running")]
    PublisherUnavailable,

    #[error("scheduler task failed: {0}")]
    Scheduler(String),

    #[error("sink already shut down")]
    AlreadyShutDown,
}
