//! HTTP seam between the harvester and the ingest endpoints.

use crate::core::{HarvestError, Result};
use crate::export::request::Request;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RETRY_AFTER;

/// Outcome of one POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Raw `Retry-After` header, if any
    pub retry_after: Option<String>,
    /// Response body, logged at debug level
    pub body: Bytes,
}

/// Sends requests. One instance is shared by every harvest.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single attempt. Errors are transport failures; any HTTP
    /// status, including errors, is an `Ok` response.
    async fn send(&self, request: &Request) -> Result<Response>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HarvestError::network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Reuse an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| HarvestError::network(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|e| HarvestError::network(format!("Failed to read response body: {}", e)))?;

        Ok(Response {
            status,
            retry_after,
            body,
        })
    }
}
