//! Turns batches into compressed POST requests no larger than the ingest
//! size cap.

use crate::core::{HarvestError, Result};
use crate::export::batch::Batch;
use crate::export::compression::{compress, compression_ratio};
use bytes::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT,
};

/// Largest compressed body the ingest endpoints accept.
pub const MAX_COMPRESSED_SIZE_BYTES: usize = 1 << 20;

/// Value sent in the `User-Agent` header.
pub const USER_AGENT_VALUE: &str = concat!("telemetry-harvester/", env!("CARGO_PKG_VERSION"));

const API_KEY: HeaderName = HeaderName::from_static("api-key");

/// Destination of a request.
#[derive(Clone)]
pub struct Endpoint {
    /// Ingest URL
    pub url: String,
    /// Key sent in the `Api-Key` header
    pub api_key: String,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new<U: Into<String>, K: Into<String>>(url: U, api_key: K) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// A ready-to-send POST.
#[derive(Debug, Clone)]
pub struct Request {
    /// Target URL
    pub url: String,
    /// Headers, credentials included
    pub headers: HeaderMap,
    /// Gzip-compressed body
    pub body: Bytes,
    /// The JSON before compression, kept for audit logging
    pub uncompressed_body: Bytes,
    /// Number of items in the body
    pub items: usize,
}

impl Request {
    /// Size of the body on the wire
    pub fn compressed_len(&self) -> usize {
        self.body.len()
    }
}

/// Serializes and compresses a batch into a single request, regardless of
/// size.
pub fn new_request<B: Batch>(batch: &B, endpoint: &Endpoint) -> Result<Request> {
    let uncompressed = batch.serialize()?;
    let compressed = compress(&uncompressed)?;

    let mut headers = HeaderMap::with_capacity(4);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    let mut key = HeaderValue::from_str(&endpoint.api_key)
        .map_err(|e| HarvestError::InvalidHeader(format!("api key: {}", e)))?;
    key.set_sensitive(true);
    headers.insert(API_KEY, key);

    Ok(Request {
        url: endpoint.url.clone(),
        headers,
        body: Bytes::from(compressed),
        uncompressed_body: Bytes::from(uncompressed),
        items: batch.len(),
    })
}

/// Builds requests for a batch, splitting it until every compressed body
/// fits [`MAX_COMPRESSED_SIZE_BYTES`].
pub fn build_requests<B: Batch>(batch: B, endpoint: &Endpoint) -> Result<Vec<Request>> {
    build_requests_with_limit(batch, endpoint, MAX_COMPRESSED_SIZE_BYTES)
}

/// Like [`build_requests`] with a custom size cap.
///
/// Fails with [`HarvestError::UnableToSplit`] when a single item alone
/// exceeds the cap; no requests are returned for the batch in that case.
pub fn build_requests_with_limit<B: Batch>(
    batch: B,
    endpoint: &Endpoint,
    limit: usize,
) -> Result<Vec<Request>> {
    let mut requests = Vec::new();
    push_requests(batch, endpoint, limit, &mut requests)?;
    Ok(requests)
}

fn push_requests<B: Batch>(
    batch: B,
    endpoint: &Endpoint,
    limit: usize,
    requests: &mut Vec<Request>,
) -> Result<()> {
    let request = new_request(&batch, endpoint)?;
    if request.compressed_len() <= limit {
        requests.push(request);
        return Ok(());
    }

    tracing::debug!(
        kind = B::KIND,
        items = batch.len(),
        compressed_bytes = request.compressed_len(),
        ratio = compression_ratio(request.uncompressed_body.len(), request.compressed_len()),
        limit,
        "splitting oversized batch"
    );

    let (front, back) = batch.split().ok_or(HarvestError::UnableToSplit)?;
    push_requests(front, endpoint, limit, requests)?;
    push_requests(back, endpoint, limit, requests)
}
