//! Dimensional metrics: value types and client-side aggregation.
//!
//! Metrics are either recorded on the harvester directly or combined by a
//! [`MetricAggregator`] and handed over right before each harvest.

pub mod aggregator;
pub mod types;

pub use aggregator::{CountHandle, GaugeHandle, MetricAggregator, SummaryHandle};
pub use types::{Count, Gauge, Metric, MetricKind, Summary};
