//! Buffers recorded telemetry and ships it on a schedule or on demand.
//!
//! A harvest runs the pre-harvest hooks, swaps the metric and span buffers
//! out under one lock, turns them into size-bounded requests and sends those
//! one after another. Every harvest is bounded by `harvest_timeout`; requests
//! still pending when the deadline passes are dropped.

mod scheduler;

use crate::core::config::Config;
use crate::core::types::Span;
use crate::core::{HarvestError, Result, RetryDecision, RetryPolicy};
use crate::export::{
    build_requests, common_attributes, Batch, CommonAttributes, Endpoint, HttpTransport,
    MetricBatch, Request, SpanBatch, Transport,
};
use crate::metrics::Metric;
use parking_lot::Mutex;
use scheduler::HarvestScheduler;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{sleep, sleep_until, Instant};

/// Target of the audit events carrying uncompressed request bodies.
pub const AUDIT_TARGET: &str = "telemetry_harvester::audit";

/// Stand-in for "never" when a configured duration overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `Instant::now() + after`, clamped to a far-future instant instead of
/// overflowing.
pub(crate) fn instant_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or(now + FAR_FUTURE)
}

/// Called at the start of every harvest, before the buffers are swapped.
pub type BeforeHarvestHook = Arc<dyn Fn(&Harvester) + Send + Sync>;

/// What happened to the requests of one harvest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Requests built from the swapped buffers
    pub prepared: usize,
    /// Accepted by the endpoint
    pub delivered: usize,
    /// Permanently rejected
    pub rejected: usize,
    /// Never completed because the deadline passed
    pub abandoned: usize,
}

impl HarvestSummary {
    /// Whether the deadline cut the harvest short
    pub fn timed_out(&self) -> bool {
        self.abandoned > 0
    }
}

enum Delivery {
    Delivered,
    Rejected,
    Cancelled,
}

#[derive(Debug)]
struct Buffers {
    last_harvest: SystemTime,
    raw_metrics: Vec<Metric>,
    spans: Vec<Span>,
}

struct Inner {
    config: Config,
    metrics_endpoint: Endpoint,
    spans_endpoint: Endpoint,
    common: Option<CommonAttributes>,
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    hooks: Vec<BeforeHarvestHook>,
    buffers: Mutex<Buffers>,
    scheduler: Mutex<Option<HarvestScheduler>>,
}

/// Builder for [`Harvester`].
pub struct HarvesterBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    hooks: Vec<BeforeHarvestHook>,
}

impl HarvesterBuilder {
    /// Start from a configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport: None,
            hooks: Vec::new(),
        }
    }

    /// Use a shared transport instead of a fresh `reqwest` client
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register a pre-harvest hook. Hooks run in registration order.
    pub fn before_harvest(mut self, hook: BeforeHarvestHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Validate the configuration and create the harvester.
    ///
    /// When collection is enabled and the harvest period is non-zero the
    /// periodic harvest task is spawned on the current tokio runtime, which
    /// must exist.
    pub fn build(self) -> Result<Harvester> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let config = self.config;
        let api_key = config.harvester.api_key.clone();
        let inner = Inner {
            metrics_endpoint: Endpoint::new(config.metrics_url(), api_key.as_str()),
            spans_endpoint: Endpoint::new(config.spans_url(), api_key),
            common: common_attributes(&config.harvester.common_attributes),
            policy: RetryPolicy::new(config.harvester.retry_backoff),
            transport,
            hooks: self.hooks,
            buffers: Mutex::new(Buffers {
                last_harvest: SystemTime::now(),
                raw_metrics: Vec::new(),
                spans: Vec::new(),
            }),
            scheduler: Mutex::new(None),
            config,
        };
        let harvester = Harvester {
            inner: Arc::new(inner),
        };

        let settings = &harvester.inner.config.harvester;
        tracing::debug!(
            harvest_period = ?settings.harvest_period,
            harvest_timeout = ?settings.harvest_timeout,
            retry_backoff = ?settings.retry_backoff,
            metrics_url = %harvester.inner.metrics_endpoint.url,
            spans_url = %harvester.inner.spans_endpoint.url,
            collect_metrics = harvester.collects_metrics(),
            collect_spans = harvester.collects_spans(),
            hooks = harvester.inner.hooks.len(),
            version = env!("CARGO_PKG_VERSION"),
            "harvester created"
        );

        if harvester.needs_scheduler() {
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                HarvestError::config(format!("Scheduled harvests need a tokio runtime: {}", e))
            })?;
            let scheduler = HarvestScheduler::spawn(
                &runtime,
                Arc::downgrade(&harvester.inner),
                settings.harvest_period,
            );
            *harvester.inner.scheduler.lock() = Some(scheduler);
        }

        Ok(harvester)
    }
}

/// Aggregates and sends telemetry. Cheap to clone; clones share buffers.
#[derive(Clone)]
pub struct Harvester {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("metrics_endpoint", &self.inner.metrics_endpoint)
            .field("spans_endpoint", &self.inner.spans_endpoint)
            .field("collecting", &self.inner.config.collection_enabled())
            .finish_non_exhaustive()
    }
}

impl Harvester {
    /// Create a harvester with the default transport and no hooks
    pub fn new(config: Config) -> Result<Self> {
        HarvesterBuilder::new(config).build()
    }

    /// Start building a harvester
    pub fn builder(config: Config) -> HarvesterBuilder {
        HarvesterBuilder::new(config)
    }

    /// Whether recorded metrics are kept
    pub fn collects_metrics(&self) -> bool {
        self.inner.config.collection_enabled()
    }

    /// Whether recorded spans are kept
    pub fn collects_spans(&self) -> bool {
        self.inner.config.collection_enabled()
    }

    fn needs_scheduler(&self) -> bool {
        !self.inner.config.harvester.harvest_period.is_zero()
            && (self.collects_metrics() || self.collects_spans())
    }

    /// Whether the periodic harvest task is running
    pub fn is_scheduled(&self) -> bool {
        self.inner.scheduler.lock().is_some()
    }

    /// Buffer a metric for the next harvest. Dropped when collection is off.
    pub fn record_metric(&self, metric: Metric) {
        if !self.collects_metrics() {
            return;
        }
        self.inner.buffers.lock().raw_metrics.push(metric);
    }

    /// Buffer a span for the next harvest.
    ///
    /// A span without a timestamp is stamped with the current time.
    pub fn record_span(&self, mut span: Span) -> Result<()> {
        if !self.collects_spans() {
            return Err(HarvestError::SpansDisabled);
        }
        if span.trace_id.is_empty() {
            return Err(HarvestError::TraceIdUnset);
        }
        if span.id.is_empty() {
            return Err(HarvestError::SpanIdUnset);
        }
        if span.timestamp.is_none() {
            span.timestamp = Some(SystemTime::now());
        }

        self.inner.buffers.lock().spans.push(span);
        Ok(())
    }

    /// Send everything recorded so far, waiting at most `harvest_timeout`.
    pub async fn harvest_now(&self) -> HarvestSummary {
        self.harvest_with_deadline(instant_after(self.inner.config.harvester.harvest_timeout))
            .await
    }

    /// Like [`Harvester::harvest_now`], giving up at `deadline` if that comes
    /// before the configured timeout.
    pub async fn harvest_with_deadline(&self, deadline: Instant) -> HarvestSummary {
        let deadline = deadline.min(instant_after(self.inner.config.harvester.harvest_timeout));

        for hook in &self.inner.hooks {
            hook(self);
        }

        let requests = self.swap_out(SystemTime::now());
        self.deliver(&requests, deadline).await
    }

    /// Stop the periodic harvest task and wait for harvests it started.
    ///
    /// Data still buffered is not sent; call [`Harvester::harvest_now`]
    /// afterwards to flush it.
    pub async fn shutdown(&self) -> Result<()> {
        let scheduler = self.inner.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await?;
            tracing::debug!("harvest scheduler stopped");
        }
        Ok(())
    }

    fn swap_out(&self, now: SystemTime) -> Vec<Request> {
        let (window_start, mut metrics, spans) = {
            let mut buffers = self.inner.buffers.lock();
            let window_start = std::mem::replace(&mut buffers.last_harvest, now);
            (
                window_start,
                std::mem::take(&mut buffers.raw_metrics),
                std::mem::take(&mut buffers.spans),
            )
        };

        metrics.retain(|metric| {
            let finite = metric.is_finite();
            if !finite {
                tracing::warn!(
                    name = metric.name(),
                    kind = %metric.kind(),
                    "dropping metric with a non-finite value"
                );
            }
            finite
        });

        let mut requests = Vec::new();
        if !metrics.is_empty() {
            let batch = MetricBatch {
                timestamp: Some(window_start),
                interval: now.duration_since(window_start).ok(),
                attributes: self.inner.common.as_ref().map(Arc::clone),
                metrics,
            };
            collect_requests(batch, &self.inner.metrics_endpoint, &mut requests);
        }
        if !spans.is_empty() {
            let batch = SpanBatch {
                attributes: self.inner.common.as_ref().map(Arc::clone),
                spans,
            };
            collect_requests(batch, &self.inner.spans_endpoint, &mut requests);
        }
        requests
    }

    async fn deliver(&self, requests: &[Request], deadline: Instant) -> HarvestSummary {
        let mut summary = HarvestSummary {
            prepared: requests.len(),
            ..HarvestSummary::default()
        };

        for (sent, request) in requests.iter().enumerate() {
            match self.send_with_retry(request, deadline).await {
                Delivery::Delivered => summary.delivered += 1,
                Delivery::Rejected => summary.rejected += 1,
                Delivery::Cancelled => {
                    summary.abandoned = requests.len() - sent;
                    tracing::error!(
                        abandoned = summary.abandoned,
                        "harvest cancelled or timed out, dropping data"
                    );
                    break;
                },
            }
        }

        summary
    }

    async fn send_with_retry(&self, request: &Request, deadline: Instant) -> Delivery {
        let inner = &self.inner;
        loop {
            tracing::debug!(
                url = %request.url,
                items = request.items,
                body_length = request.compressed_len(),
                "data post"
            );
            if inner.config.harvester.audit {
                tracing::trace!(
                    target: AUDIT_TARGET,
                    url = %request.url,
                    data = %String::from_utf8_lossy(&request.uncompressed_body),
                    "uncompressed request body"
                );
            }

            let outcome = tokio::select! {
                biased;
                () = sleep_until(deadline) => return Delivery::Cancelled,
                outcome = inner.transport.send(request) => outcome,
            };

            let wait = match outcome {
                Ok(response) => {
                    tracing::debug!(
                        status = response.status,
                        body = %String::from_utf8_lossy(&response.body),
                        "data post response"
                    );
                    match inner
                        .policy
                        .classify(response.status, response.retry_after.as_deref())
                    {
                        RetryDecision::Delivered => return Delivery::Delivered,
                        RetryDecision::Rejected => {
                            tracing::error!(
                                url = %request.url,
                                status = response.status,
                                "request rejected, dropping data"
                            );
                            return Delivery::Rejected;
                        },
                        RetryDecision::Retry(wait) => wait,
                    }
                },
                Err(e) => {
                    tracing::error!(url = %request.url, error = %e, category = e.category(), "data post failed");
                    inner.policy.on_transport_error()
                },
            };

            tracing::debug!(url = %request.url, wait = ?wait, "retrying data post");
            tokio::select! {
                biased;
                () = sleep_until(deadline) => return Delivery::Cancelled,
                () = sleep(wait) => {},
            }
        }
    }
}

fn collect_requests<B: Batch>(batch: B, endpoint: &Endpoint, requests: &mut Vec<Request>) {
    let items = batch.len();
    match build_requests(batch, endpoint) {
        Ok(built) => requests.extend(built),
        Err(e) => tracing::error!(
            kind = B::KIND,
            items,
            error = %e,
            "error creating requests, dropping data"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigBuilder;
    use crate::export::Response;
    use crate::metrics::{Count, Gauge, MetricAggregator};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct AcceptAll {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for AcceptAll {
        async fn send(&self, _request: &Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response {
                status: 202,
                retry_after: None,
                body: Bytes::new(),
            })
        }
    }

    fn manual_config(api_key: &str) -> Config {
        ConfigBuilder::new()
            .api_key(api_key)
            .harvest_period(Duration::ZERO)
            .build()
            .unwrap()
    }

    fn harvester(api_key: &str, transport: Arc<AcceptAll>) -> Harvester {
        Harvester::builder(manual_config(api_key))
            .transport(transport)
            .build()
            .unwrap()
    }

    fn count(name: &str) -> Metric {
        Metric::Count(Count {
            name: name.to_string(),
            value: 1.0,
            ..Count::default()
        })
    }

    #[test]
    fn test_record_span_disabled() {
        let h = harvester("", Arc::new(AcceptAll::default()));
        let span = Span::builder().id("a").trace_id("t").build();
        assert!(matches!(h.record_span(span), Err(HarvestError::SpansDisabled)));
    }

    #[test]
    fn test_record_span_requires_ids() {
        let h = harvester("key", Arc::new(AcceptAll::default()));

        let no_trace = Span::builder().id("a").build();
        assert!(matches!(h.record_span(no_trace), Err(HarvestError::TraceIdUnset)));

        let no_id = Span::builder().trace_id("t").build();
        assert!(matches!(h.record_span(no_id), Err(HarvestError::SpanIdUnset)));

        // Trace id is checked first.
        assert!(matches!(
            h.record_span(Span::default()),
            Err(HarvestError::TraceIdUnset)
        ));
        assert!(h.inner.buffers.lock().spans.is_empty());
    }

    #[test]
    fn test_record_span_defaults_timestamp() {
        let h = harvester("key", Arc::new(AcceptAll::default()));
        let before = SystemTime::now();
        h.record_span(Span::builder().id("a").trace_id("t").build())
            .unwrap();

        let buffers = h.inner.buffers.lock();
        let stamped = buffers.spans[0].timestamp.unwrap();
        assert!(stamped >= before);
    }

    #[test]
    fn test_record_metric_disabled_is_dropped() {
        let h = harvester("", Arc::new(AcceptAll::default()));
        h.record_metric(count("x"));
        assert!(h.inner.buffers.lock().raw_metrics.is_empty());
        assert!(!h.collects_metrics());
    }

    #[test]
    fn test_manual_mode_has_no_scheduler() {
        let h = harvester("key", Arc::new(AcceptAll::default()));
        assert!(!h.is_scheduled());
    }

    #[tokio::test]
    async fn test_scheduler_requires_api_key() {
        let config = ConfigBuilder::new()
            .harvest_period(Duration::from_secs(1))
            .build()
            .unwrap();
        let h = Harvester::builder(config)
            .transport(Arc::new(AcceptAll::default()))
            .build()
            .unwrap();
        assert!(!h.is_scheduled());
    }

    #[test]
    fn test_scheduler_without_runtime_fails() {
        let config = ConfigBuilder::new()
            .api_key("key")
            .harvest_period(Duration::from_secs(1))
            .build()
            .unwrap();
        let result = Harvester::builder(config)
            .transport(Arc::new(AcceptAll::default()))
            .build();
        assert!(matches!(result, Err(HarvestError::Config(_))));
    }

    #[test]
    fn test_swap_out_window() {
        let h = harvester("key", Arc::new(AcceptAll::default()));
        let start = h.inner.buffers.lock().last_harvest;
        let now = start + Duration::from_secs(5);
        h.record_metric(count("x"));

        let requests = h.swap_out(now);
        assert_eq!(requests.len(), 1);

        let body: serde_json::Value = serde_json::from_slice(&requests[0].uncompressed_body).unwrap();
        assert_eq!(body[0]["common"]["interval.ms"], 5000);
        assert_eq!(h.inner.buffers.lock().last_harvest, now);
        assert!(h.swap_out(now).is_empty());
    }

    #[tokio::test]
    async fn test_harvest_sends_metrics_then_spans() {
        let transport = Arc::new(AcceptAll::default());
        let h = harvester("key", Arc::clone(&transport));
        h.record_metric(count("x"));
        h.record_span(Span::builder().id("a").trace_id("t").build())
            .unwrap();

        let summary = h.harvest_now().await;
        assert_eq!(summary.prepared, 2);
        assert_eq!(summary.delivered, 2);
        assert!(!summary.timed_out());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_harvest_sends_nothing() {
        let transport = Arc::new(AcceptAll::default());
        let h = harvester("key", Arc::clone(&transport));
        assert_eq!(h.harvest_now().await, HarvestSummary::default());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hooks_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);
        let h = Harvester::builder(manual_config("key"))
            .transport(Arc::new(AcceptAll::default()))
            .before_harvest(Arc::new(move |_: &Harvester| first.lock().push(1)))
            .before_harvest(Arc::new(move |_: &Harvester| second.lock().push(2)))
            .build()
            .unwrap();

        h.harvest_now().await;
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_aggregator_hook_drains_into_harvest() {
        let transport = Arc::new(AcceptAll::default());
        let ag = MetricAggregator::new();
        let h = Harvester::builder(manual_config("key"))
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .before_harvest(ag.harvest_hook())
            .build()
            .unwrap();

        ag.new_count("x", Default::default()).increment();
        let summary = h.harvest_now().await;
        assert_eq!(summary.delivered, 1);
        assert!(ag.is_empty());
    }

    #[test]
    fn test_non_finite_metric_is_dropped() {
        let h = harvester("key", Arc::new(AcceptAll::default()));
        h.record_metric(Metric::Gauge(Gauge {
            name: "broken".to_string(),
            attributes: Default::default(),
            value: f64::NAN,
            timestamp: SystemTime::now(),
        }));
        h.record_metric(count("x"));

        let requests = h.swap_out(SystemTime::now());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].items, 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].uncompressed_body).unwrap();
        assert_eq!(body[0]["metrics"][0]["name"], "x");

        h.record_metric(Metric::Count(Count {
            name: "inf".to_string(),
            value: f64::INFINITY,
            ..Count::default()
        }));
        assert!(h.swap_out(SystemTime::now()).is_empty());
    }

    #[test]
    fn test_instant_after_saturates() {
        let now = Instant::now();
        assert!(instant_after(Duration::MAX) > now + Duration::from_secs(86_400 * 365));
        let soon = instant_after(Duration::from_secs(1));
        assert!(soon > now && soon <= Instant::now() + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_huge_timeout_still_harvests() {
        let transport = Arc::new(AcceptAll::default());
        let config = ConfigBuilder::new()
            .api_key("key")
            .harvest_period(Duration::ZERO)
            .harvest_timeout(Duration::MAX)
            .build()
            .unwrap();
        let h = Harvester::builder(config)
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .build()
            .unwrap();

        h.record_metric(count("x"));
        assert_eq!(h.harvest_now().await.delivered, 1);
        assert_eq!(
            h.harvest_with_deadline(Instant::now() + Duration::from_secs(1))
                .await,
            HarvestSummary::default()
        );
    }

    #[tokio::test]
    async fn test_huge_period_scheduler_stays_alive() {
        let config = ConfigBuilder::new()
            .api_key("key")
            .harvest_period(Duration::from_secs(u64::MAX))
            .build()
            .unwrap();
        let h = Harvester::builder(config)
            .transport(Arc::new(AcceptAll::default()))
            .build()
            .unwrap();
        assert!(h.is_scheduled());

        tokio::task::yield_now().await;
        h.shutdown().await.unwrap();
        assert!(!h.is_scheduled());
    }
}
