//! Push-stream transport seam.
//!
//! The transport owns wire framing (message boundaries, event-id/type
//! fields, retry hints); the feed client's responsibility begins once one
//! complete message payload arrives as a string.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;

/// Stream of raw text frame payloads pushed by the server.
///
/// An `Err` item or the end of the stream both mean the connection is gone.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Errors produced by the push-stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request could not be built or sent.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("http status {0}")]
    Status(reqwest::StatusCode),

    /// Established stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Opens push-stream connections to an endpoint.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Opens a new connection and returns its frame stream.
    async fn open(&self, endpoint: &str) -> Result<FrameStream, TransportError>;
}

/// Production transport: a long-lived `text/event-stream` response whose
/// frames are decoded by `eventsource-stream`.
pub struct SseTransport {
    http: reqwest::Client,
}

impl SseTransport {
    /// Builds the transport with its own HTTP client.
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FeedTransport for SseTransport {
    async fn open(&self, endpoint: &str) -> Result<FrameStream, TransportError> {
        let response = self.http.get(endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        let frames = response
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(event) => Ok(event.data),
                Err(error) => Err(TransportError::Stream(error.to_string())),
            })
            .boxed();
        Ok(frames)
    }
}
