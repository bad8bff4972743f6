//! HTTP client for the records REST endpoints.
//!
//! The records service exposes a conventional CRUD surface over the same
//! table the event feed watches. Mutations are acknowledged with a
//! `{"status": "ok"}` envelope rather than a response body.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::retry::{retry_async, RetryPolicy};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// Default base URL for the records REST service.
pub const API_BASE_URL: &str = "http://localhost:5000";

/// Construction options for [`RecordsApiClient`].
#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    /// TCP connect timeout for the underlying HTTP client.
    pub connect_timeout: Duration,
    /// Per-attempt request timeout.
    pub attempt_timeout: Duration,
    /// Retry policy applied to transient transport failures.
    pub retry_policy: RetryPolicy,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(2),
            retry_policy: RetryPolicy::low_latency(),
        }
    }
}

/// Row of the records resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Row identifier assigned by the service.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Address.
    pub email: String,
}

/// Create/update body for a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmailRecord {
    /// Display name.
    pub name: String,
    /// Address.
    pub email: String,
}

/// Errors produced by the records REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be sent or its response body read.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    /// Server answered with a non-success status.
    #[error("http {status}: {body}")]
    HttpStatus {
        /// Response status code.
        status: StatusCode,
        /// Truncated response body.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("response decode failed: {source}. body={body}")]
    Decode {
        /// Decode failure.
        #[source]
        source: serde_json::Error,
        /// Truncated response body.
        body: String,
    },

    /// Service acknowledged the request with a non-ok envelope.
    #[error("service returned error envelope: {0}")]
    Envelope(String),
}

impl ApiError {
    /// Transient transport failures are worth another attempt.
    fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(error) if error.is_connect() || error.is_timeout())
    }
}

/// Typed client over the records REST surface.
pub struct RecordsApiClient {
    http: Client,
    base_url: String,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl RecordsApiClient {
    /// Creates a client with default options.
    pub fn new() -> Result<Self, ApiError> {
        Self::with_options(ApiClientOptions::default())
    }

    /// Creates a client with explicit options.
    pub fn with_options(options: ApiClientOptions) -> Result<Self, ApiError> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            base_url: API_BASE_URL.to_string(),
            attempt_timeout: options.attempt_timeout,
            retry_policy: options.retry_policy,
        })
    }

    /// Sets an explicit base URL, replacing [`API_BASE_URL`].
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim().trim_end_matches('/').to_string();
        self
    }

    /// Fetches all records.
    pub async fn list_records(&self) -> Result<Vec<EmailRecord>, ApiError> {
        let body = self.execute(|| self.http.get(self.endpoint("/emails"))).await?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            source,
            body: snippet(&body),
        })
    }

    /// Creates a record.
    pub async fn create_record(&self, record: &NewEmailRecord) -> Result<(), ApiError> {
        let body = self
            .execute(|| self.http.post(self.endpoint("/emails")).json(record))
            .await?;
        check_status_envelope(&body)
    }

    /// Updates the record with the given id.
    pub async fn update_record(&self, id: i64, record: &NewEmailRecord) -> Result<(), ApiError> {
        let body = self
            .execute(|| {
                self.http
                    .put(self.endpoint(&format!("/emails/{id}")))
                    .json(record)
            })
            .await?;
        check_status_envelope(&body)
    }

    /// Deletes the record with the given id.
    pub async fn delete_record(&self, id: i64) -> Result<(), ApiError> {
        let body = self
            .execute(|| self.http.delete(self.endpoint(&format!("/emails/{id}"))))
            .await?;
        check_status_envelope(&body)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<B>(&self, build: B) -> Result<String, ApiError>
    where
        B: Fn() -> reqwest::RequestBuilder,
    {
        retry_async(
            &self.retry_policy,
            |attempt| {
                let request = build().timeout(self.attempt_timeout);
                async move {
                    if attempt > 1 {
                        debug!(event = "api_retry_attempt", attempt);
                    }
                    let response = request.send().await.map_err(ApiError::Transport)?;
                    let status = response.status();
                    let body = response.text().await.map_err(ApiError::Transport)?;
                    if !status.is_success() {
                        return Err(ApiError::HttpStatus {
                            status,
                            body: snippet(&body),
                        });
                    }
                    Ok(body)
                }
            },
            |error| error.is_transient(),
        )
        .await
    }
}

fn check_status_envelope(body: &str) -> Result<(), ApiError> {
    let value: Value = serde_json::from_str(body).map_err(|source| ApiError::Decode {
        source,
        body: snippet(body),
    })?;
    match value.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(()),
        Some(other) => Err(ApiError::Envelope(other.to_string())),
        None => Err(ApiError::Envelope(format!(
            "missing status field: {}",
            snippet(body)
        ))),
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= ERROR_BODY_SNIPPET_LEN {
        return trimmed.to_string();
    }
    let mut end = ERROR_BODY_SNIPPET_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
