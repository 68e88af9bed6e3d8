//! Metric value types and their wire representation.
//!
//! Count and Summary may leave `timestamp`/`interval` unset, in which case the
//! batch window written in the `common` block applies. Gauges always carry
//! their own timestamp.

use crate::core::attributes::{vet, Attributes};
use crate::core::wire::{duration_millis, epoch_millis, serialize_number};
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Kind of a metric, written as the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    /// Number of occurrences over the window
    Count,
    /// Point-in-time measurement
    Gauge,
    /// Count/sum/min/max of discrete observations
    Summary,
}

impl MetricKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Gauge => "gauge",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts the number of times an event occurred within the reporting window.
///
/// The value is reset every harvest, so the reported value is the difference
/// over the window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Count {
    /// Metric name
    pub name: String,
    /// Dimensions identifying this count
    pub attributes: Attributes,
    /// Sum of the increments in the window
    pub value: f64,
    /// Start of this metric's interval; the batch window start when unset
    pub timestamp: Option<SystemTime>,
    /// Length of this metric's interval; the batch window length when unset
    pub interval: Option<Duration>,
}

/// Value of something at a particular moment in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Gauge {
    /// Metric name
    pub name: String,
    /// Dimensions identifying this gauge
    pub attributes: Attributes,
    /// Last value written
    pub value: f64,
    /// When `value` was observed
    pub timestamp: SystemTime,
}

/// Aggregated information about discrete events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Metric name
    pub name: String,
    /// Dimensions identifying this summary
    pub attributes: Attributes,
    /// Number of observations
    pub count: f64,
    /// Sum of observations
    pub sum: f64,
    /// Smallest observation
    pub min: f64,
    /// Largest observation
    pub max: f64,
    /// Start of this metric's interval; the batch window start when unset
    pub timestamp: Option<SystemTime>,
    /// Length of this metric's interval; the batch window length when unset
    pub interval: Option<Duration>,
}

/// Any metric that can be recorded by the harvester.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    /// See [`Count`]
    Count(Count),
    /// See [`Gauge`]
    Gauge(Gauge),
    /// See [`Summary`]
    Summary(Summary),
}

impl Metric {
    /// Metric name
    pub fn name(&self) -> &str {
        match self {
            Self::Count(m) => &m.name,
            Self::Gauge(m) => &m.name,
            Self::Summary(m) => &m.name,
        }
    }

    /// Metric kind
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Count(_) => MetricKind::Count,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Summary(_) => MetricKind::Summary,
        }
    }

    /// Metric attributes
    pub fn attributes(&self) -> &Attributes {
        match self {
            Self::Count(m) => &m.attributes,
            Self::Gauge(m) => &m.attributes,
            Self::Summary(m) => &m.attributes,
        }
    }

    /// Whether every value can be written as a JSON number
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Count(m) => m.value.is_finite(),
            Self::Gauge(m) => m.value.is_finite(),
            Self::Summary(m) => [m.count, m.sum, m.min, m.max].iter().all(|v| v.is_finite()),
        }
    }
}

impl From<Count> for Metric {
    fn from(m: Count) -> Self {
        Self::Count(m)
    }
}

impl From<Gauge> for Metric {
    fn from(m: Gauge) -> Self {
        Self::Gauge(m)
    }
}

impl From<Summary> for Metric {
    fn from(m: Summary) -> Self {
        Self::Summary(m)
    }
}

#[derive(serde::Serialize)]
struct SummaryValue {
    #[serde(serialize_with = "serialize_number")]
    sum: f64,
    #[serde(serialize_with = "serialize_number")]
    count: f64,
    #[serde(serialize_with = "serialize_number")]
    min: f64,
    #[serde(serialize_with = "serialize_number")]
    max: f64,
}

struct Scalar(f64);

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_number(&self.0, serializer)
    }
}

#[derive(serde::Serialize)]
#[serde(untagged)]
enum WireValue {
    Scalar(Scalar),
    Summary(SummaryValue),
}

#[derive(serde::Serialize)]
struct WireMetric<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: WireValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(rename = "interval.ms", skip_serializing_if = "Option::is_none")]
    interval_ms: Option<i64>,
    attributes: Map<String, Value>,
}

fn interval_field(interval: Option<Duration>) -> Option<i64> {
    interval.filter(|d| !d.is_zero()).map(duration_millis)
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let (value, timestamp, interval) = match self {
            Self::Count(m) => (WireValue::Scalar(Scalar(m.value)), m.timestamp, m.interval),
            Self::Gauge(m) => (WireValue::Scalar(Scalar(m.value)), Some(m.timestamp), None),
            Self::Summary(m) => (
                WireValue::Summary(SummaryValue {
                    sum: m.sum,
                    count: m.count,
                    min: m.min,
                    max: m.max,
                }),
                m.timestamp,
                m.interval,
            ),
        };

        WireMetric {
            name: self.name(),
            kind: self.kind().as_str(),
            value,
            timestamp: timestamp.map(epoch_millis),
            interval_ms: interval_field(interval),
            attributes: vet(self.attributes()),
        }
        .serialize(serializer)
    }
}
