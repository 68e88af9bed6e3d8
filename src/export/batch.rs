//! Batches of metrics and spans and their JSON envelopes.
//!
//! Both envelopes are a one-element array holding a `common` block and the
//! items. A batch splits into two contiguous halves that inherit the shared
//! attributes and window, which is what the request layer bisects on.

use crate::core::attributes::{vet, Attributes};
use crate::core::types::Span;
use crate::core::wire::{duration_millis, epoch_millis};
use crate::core::Result;
use crate::metrics::Metric;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Pre-serialized attributes shared by every batch of a harvester.
pub type CommonAttributes = Arc<Map<String, Value>>;

/// Vets configured common attributes once. Empty sets yield `None` so the
/// `attributes` key is left out of the `common` block.
pub fn common_attributes(attributes: &Attributes) -> Option<CommonAttributes> {
    if attributes.is_empty() {
        None
    } else {
        Some(Arc::new(vet(attributes)))
    }
}

/// A group of items sent in one request, divisible when too large.
pub trait Batch: Sized + Send {
    /// Short label used in logs
    const KIND: &'static str;

    /// Render the JSON envelope.
    fn serialize(&self) -> Result<Vec<u8>>;

    /// Halve the batch; `None` when it holds fewer than two items.
    fn split(self) -> Option<(Self, Self)>;

    /// Number of items
    fn len(&self) -> usize;

    /// Returns true when there is nothing to send
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metrics sharing one harvest window.
#[derive(Debug, Clone, Default)]
pub struct MetricBatch {
    /// Window start, applied to items without their own timestamp
    pub timestamp: Option<SystemTime>,
    /// Window length
    pub interval: Option<Duration>,
    /// Attributes shared by all metrics
    pub attributes: Option<CommonAttributes>,
    /// The metrics
    pub metrics: Vec<Metric>,
}

#[derive(Serialize)]
struct MetricCommon<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(rename = "interval.ms", skip_serializing_if = "Option::is_none")]
    interval_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a Map<String, Value>>,
}

#[derive(Serialize)]
struct MetricGroup<'a> {
    common: MetricCommon<'a>,
    metrics: &'a [Metric],
}

impl Batch for MetricBatch {
    const KIND: &'static str = "metrics";

    fn serialize(&self) -> Result<Vec<u8>> {
        let group = MetricGroup {
            common: MetricCommon {
                timestamp: self.timestamp.map(epoch_millis),
                interval_ms: self
                    .interval
                    .filter(|d| !d.is_zero())
                    .map(duration_millis),
                attributes: self.attributes.as_deref(),
            },
            metrics: &self.metrics,
        };
        Ok(serde_json::to_vec(&[group])?)
    }

    fn split(mut self) -> Option<(Self, Self)> {
        if self.metrics.len() < 2 {
            return None;
        }
        let back = self.metrics.split_off(self.metrics.len() / 2);
        let other = MetricBatch {
            timestamp: self.timestamp,
            interval: self.interval,
            attributes: self.attributes.as_ref().map(Arc::clone),
            metrics: back,
        };
        Some((self, other))
    }

    fn len(&self) -> usize {
        self.metrics.len()
    }
}

/// Spans sharing one set of common attributes.
#[derive(Debug, Clone, Default)]
pub struct SpanBatch {
    /// Attributes shared by all spans
    pub attributes: Option<CommonAttributes>,
    /// The spans
    pub spans: Vec<Span>,
}

#[derive(Serialize)]
struct SpanCommon<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a Map<String, Value>>,
}

#[derive(Serialize)]
struct SpanGroup<'a> {
    common: SpanCommon<'a>,
    spans: &'a [Span],
}

impl Batch for SpanBatch {
    const KIND: &'static str = "spans";

    fn serialize(&self) -> Result<Vec<u8>> {
        let group = SpanGroup {
            common: SpanCommon {
                attributes: self.attributes.as_deref(),
            },
            spans: &self.spans,
        };
        Ok(serde_json::to_vec(&[group])?)
    }

    fn split(mut self) -> Option<(Self, Self)> {
        if self.spans.len() < 2 {
            return None;
        }
        let back = self.spans.split_off(self.spans.len() / 2);
        let other = SpanBatch {
            attributes: self.attributes.as_ref().map(Arc::clone),
            spans: back,
        };
        Some((self, other))
    }

    fn len(&self) -> usize {
        self.spans.len()
    }
}
