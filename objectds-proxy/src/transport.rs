//! Upstream transport.
//!
//! The proxy talks to the upstream query endpoint through the [`Transport`]
//! trait; [`HttpTransport`] is the reqwest implementation used in production.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, error, instrument};

/// One outbound POST
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,

    /// Full `Authorization` header value
    pub authorization: Option<String>,

    pub body: Bytes,
}

/// Status and body of an upstream reply
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport failures; all of them mean no usable response was obtained
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("could not build HTTP client: {0}")]
    Build(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Sends a JSON body to the upstream and returns the raw reply
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// reqwest-backed transport with a pooled client
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(url = %request.url, bytes = request.body.len()))]
    async fn post(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        debug!("Sending batched query");

        let mut builder = self
            .client
            .post(&request.url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(request.body);
        if let Some(authorization) = &request.authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }

        let response = builder.send().await.map_err(|e| {
            error!(error = %e, "Failed to reach upstream");
            TransportError::from(e)
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(status, bytes = body.len(), "Upstream replied");

        Ok(UpstreamResponse { status, body })
    }
}
