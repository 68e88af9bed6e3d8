//! Common test utilities and fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use harvester_lib::core::{Config, ConfigBuilder, Result};
use harvester_lib::export::compression::decompress;
use harvester_lib::export::{Request, Response, Transport};
use harvester_lib::{HarvestError, Harvester};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scripted reply of the mock transport.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this status
    Status(u16),
    /// 429 with a `Retry-After` header
    Throttled(&'static str),
    /// Fail the send itself
    Fail,
}

/// One observed send.
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub url: String,
    pub items: usize,
    pub body: serde_json::Value,
}

/// Transport that replays scripted replies and records every attempt.
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    /// Always answer with `fallback`.
    pub fn new(fallback: Reply) -> Arc<Self> {
        Self::scripted(Vec::new(), fallback)
    }

    /// Answer with `script` in order, then `fallback` forever.
    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Time between consecutive attempts.
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|pair| pair[1].at - pair[0].at)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        let body = decompress(&request.body).expect("gzip body");
        self.calls.lock().push(Call {
            at: Instant::now(),
            url: request.url.clone(),
            items: request.items,
            body: serde_json::from_slice(&body).expect("json body"),
        });

        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let (status, retry_after) = match reply {
            Reply::Status(status) => (status, None),
            Reply::Throttled(after) => (429, Some(after.to_string())),
            Reply::Fail => return Err(HarvestError::network("connection refused")),
        };

        Ok(Response {
            status,
            retry_after,
            body: Bytes::from_static(b"{}"),
        })
    }
}

/// Manual-mode config with an API key.
pub fn manual_config() -> ConfigBuilder {
    ConfigBuilder::new()
        .api_key("test-key")
        .harvest_period(Duration::ZERO)
}

/// Harvester wired to a mock transport.
pub fn harvester_with(config: Config, transport: &Arc<MockTransport>) -> Harvester {
    Harvester::builder(config)
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
        .build()
        .expect("harvester")
}
