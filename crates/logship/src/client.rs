//! Remote ingestion client contract and the default HTTP implementation.
//!
//! The sink core only ever talks to the remote side through [`IngestClient`]:
//! one call to look up a stream's sequencing token at bootstrap, one call per
//! batch upload. Retry, backoff, and sequence-token conflict recovery are the
//! client's responsibility, not the core's.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::constants::{PUBLISH_RETRY_COUNT, REQUEST_TIMEOUT, RETRY_BACKOFF};
use crate::event::LogEvent;

/// Errors surfaced by an ingestion client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingestion endpoint returned {status}")]
    Status { status: StatusCode },

    #[error("gave up after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
}

/// A remote stream as reported by `describe_streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescription {
    pub stream_name: String,
    /// Current append cursor for the stream; absent for a stream that has
    /// never been written to.
    pub sequence_token: Option<String>,
}

/// Contract the sink depends on for talking to the remote ingestion API.
#[async_trait]
pub trait IngestClient: Send + Sync {
    /// Lists streams in `group` whose names start with `stream_prefix`,
    /// along with their current sequencing tokens. The remote side matches by
    /// prefix; callers that need one stream must still compare names exactly.
    async fn describe_streams(
        &self,
        group: &str,
        stream_prefix: &str,
    ) -> Result<Vec<StreamDescription>, ClientError>;

    /// Uploads `events`, in order, to `group`/`stream` using `sequence_token`
    /// as the append cursor, and returns the token for the next call.
    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ClientError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    timestamp: i64,
    message: &'a str,
}

impl<'a> From<&'a LogEvent> for WireEvent<'a> {
    fn from(event: &'a LogEvent) -> Self {
        WireEvent {
            timestamp: event.timestamp,
            message: &event.message,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutEventsRequest<'a> {
    group: &'a str,
    stream: &'a str,
    events: &'a [WireEvent<'a>],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutEventsResponse {
    next_sequence_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeStreamsRequest<'a> {
    group: &'a str,
    stream_prefix: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeStreamsResponse {
    streams: Vec<StreamDescription>,
}

/// Body of a 409 response; the endpoint reports the cursor it expected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictResponse {
    expected_sequence_token: Option<String>,
}

/// Default [`IngestClient`] speaking JSON over HTTP.
///
/// Uploads retry transient failures (5xx, network errors) with linear backoff
/// up to [`PUBLISH_RETRY_COUNT`] attempts. A 409 response means the sequence
/// token went stale under us; the client re-queries the stream's cursor and
/// retries with the fresh token.
#[derive(Debug, Clone)]
pub struct HttpIngestClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpIngestClient {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        HttpIngestClient {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}/api/v1/{path}", self.endpoint))
            .timeout(REQUEST_TIMEOUT);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-Api-Key", api_key);
        }
        request
    }

    /// Re-reads the stream's current append cursor after a token conflict.
    async fn current_token(&self, group: &str, stream: &str) -> Result<Option<String>, ClientError> {
        let streams = self.describe_streams(group, stream).await?;
        Ok(streams
            .into_iter()
            .find(|s| s.stream_name == stream)
            .and_then(|s| s.sequence_token))
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn describe_streams(
        &self,
        group: &str,
        stream_prefix: &str,
    ) -> Result<Vec<StreamDescription>, ClientError> {
        let request = DescribeStreamsRequest {
            group,
            stream_prefix,
        };
        let response = self
            .request("describe-streams")
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status { status });
        }
        let parsed: DescribeStreamsResponse = response.json().await?;
        Ok(parsed.streams)
    }

    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ClientError> {
        let wire_events: Vec<WireEvent> = events.iter().map(WireEvent::from).collect();
        let mut token = sequence_token.map(str::to_owned);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let request = PutEventsRequest {
                group,
                stream,
                events: &wire_events,
                sequence_token: token.as_deref(),
            };
            let last_failure = match self.request("put-events").json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: PutEventsResponse = response.json().await?;
                        return Ok(parsed.next_sequence_token);
                    }
                    if status == StatusCode::CONFLICT {
                        // The append cursor moved under us. Prefer the token
                        // the conflict response names; re-describe otherwise.
                        warn!(stream, "sequence token rejected, renegotiating");
                        let body = response.bytes().await.unwrap_or_default();
                        token = match serde_json::from_slice::<ConflictResponse>(&body) {
                            Ok(ConflictResponse {
                                expected_sequence_token: Some(expected),
                            }) => Some(expected),
                            _ => self.current_token(group, stream).await?,
                        };
                    } else if status == StatusCode::FORBIDDEN {
                        error!("request denied by the ingestion endpoint, check the API key");
                        return Err(ClientError::Status { status });
                    } else if !status.is_server_error() {
                        return Err(ClientError::Status { status });
                    }
                    format!("status {status}")
                }
                Err(e) => e.to_string(),
            };

            if attempts >= PUBLISH_RETRY_COUNT {
                return Err(ClientError::Exhausted {
                    attempts,
                    message: last_failure,
                });
            }
            tokio::time::sleep(RETRY_BACKOFF * attempts).await;
        }
    }
}
