//! Retry decisions for ingest responses.
//!
//! The policy is flat: every retry waits the configured backoff, except a
//! 429 whose `Retry-After` asks for longer. There is no attempt limit; the
//! harvest deadline ends the loop.

use std::time::Duration;

/// Statuses that mean the payload will never be accepted.
const PERMANENT_FAILURES: [u16; 6] = [400, 403, 404, 405, 411, 413];

/// What to do after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Accepted by the endpoint
    Delivered,
    /// Permanently rejected; drop the payload
    Rejected,
    /// Send again after waiting this long
    Retry(Duration),
}

/// Retry policy with a fixed default backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy that waits `backoff` between attempts
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Default wait between attempts
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Classify an HTTP response.
    pub fn classify(&self, status: u16, retry_after: Option<&str>) -> RetryDecision {
        match status {
            200 | 202 => RetryDecision::Delivered,
            s if PERMANENT_FAILURES.contains(&s) => RetryDecision::Rejected,
            429 => RetryDecision::Retry(self.throttled_wait(retry_after)),
            _ => RetryDecision::Retry(self.backoff),
        }
    }

    /// Wait after a transport error.
    pub fn on_transport_error(&self) -> Duration {
        self.backoff
    }

    fn throttled_wait(&self, retry_after: Option<&str>) -> Duration {
        retry_after
            .and_then(parse_retry_after)
            .filter(|requested| *requested > self.backoff)
            .unwrap_or(self.backoff)
    }
}

/// Parses a `Retry-After` value given in (possibly fractional) seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}
