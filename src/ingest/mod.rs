//! JSON-lines record ingestion for the command-line binary.
//!
//! Each line is one tagged record:
//!
//! ```text
//! {"type":"count","name":"requests","value":2,"attributes":{"route":"/"}}
//! {"type":"gauge","name":"queue.depth","value":17,"timestamp":"2024-05-01T12:00:00Z"}
//! {"type":"summary","name":"latency","duration_ms":12.5}
//! {"type":"span","id":"a1","trace_id":"t1","name":"GET /","duration_ms":40}
//! ```
//!
//! Metrics go through the aggregator; spans are recorded on the harvester
//! directly.

use crate::core::attributes::Attributes;
use crate::core::types::Span;
use crate::core::{HarvestError, Result};
use crate::harvester::Harvester;
use crate::metrics::MetricAggregator;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    /// Increase a count; `value` defaults to 1
    Count {
        /// Metric name
        name: String,
        /// Increment
        #[serde(default)]
        value: Option<f64>,
        /// Metric attributes
        #[serde(default)]
        attributes: Attributes,
    },
    /// Set a gauge
    Gauge {
        /// Metric name
        name: String,
        /// New value
        value: f64,
        /// Observation time, RFC 3339; now when absent
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        /// Metric attributes
        #[serde(default)]
        attributes: Attributes,
    },
    /// Add a summary observation, either a plain value or a duration
    Summary {
        /// Metric name
        name: String,
        /// Observed value
        #[serde(default)]
        value: Option<f64>,
        /// Observed duration in milliseconds
        #[serde(default)]
        duration_ms: Option<f64>,
        /// Metric attributes
        #[serde(default)]
        attributes: Attributes,
    },
    /// Record a finished span
    Span(SpanRecord),
}

/// Span fields accepted on input.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpanRecord {
    /// Span id
    pub id: String,
    /// Trace id
    pub trace_id: String,
    /// Parent span id
    pub parent_id: Option<String>,
    /// Operation name
    pub name: Option<String>,
    /// Emitting service
    pub service_name: Option<String>,
    /// Start time, RFC 3339
    pub timestamp: Option<DateTime<Utc>>,
    /// Duration in milliseconds
    pub duration_ms: Option<f64>,
    /// Custom attributes
    pub attributes: Attributes,
}

impl From<SpanRecord> for Span {
    fn from(record: SpanRecord) -> Self {
        Span {
            id: record.id,
            trace_id: record.trace_id,
            timestamp: record.timestamp.map(SystemTime::from),
            name: record.name,
            parent_id: record.parent_id,
            duration: record.duration_ms.and_then(millis_to_duration),
            service_name: record.service_name,
            attributes: record.attributes,
        }
    }
}

fn millis_to_duration(ms: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records applied
    pub accepted: usize,
    /// Lines that failed to parse or apply
    pub rejected: usize,
}

/// Parse a single line.
pub fn parse_record(line: &str) -> Result<Record> {
    serde_json::from_str(line).map_err(|e| HarvestError::ingest(format!("invalid record: {}", e)))
}

/// Apply a record to the aggregator or harvester.
pub fn apply(record: Record, aggregator: &MetricAggregator, harvester: &Harvester) -> Result<()> {
    match record {
        Record::Count {
            name,
            value,
            attributes,
        } => {
            aggregator
                .new_count(&name, attributes)
                .increase(value.unwrap_or(1.0));
        },
        Record::Gauge {
            name,
            value,
            timestamp,
            attributes,
        } => {
            let timestamp = timestamp.map_or_else(SystemTime::now, SystemTime::from);
            aggregator.new_gauge(&name, attributes).value_at(value, timestamp);
        },
        Record::Summary {
            name,
            value,
            duration_ms,
            attributes,
        } => {
            let summary = aggregator.new_summary(&name, attributes);
            match (value, duration_ms.and_then(millis_to_duration)) {
                (Some(value), _) => summary.record(value),
                (None, Some(duration)) => summary.record_duration(duration),
                (None, None) => {
                    return Err(HarvestError::ingest(format!(
                        "summary '{}' needs a value or duration_ms",
                        name
                    )))
                },
            }
        },
        Record::Span(span) => harvester.record_span(span.into())?,
    }
    Ok(())
}

/// Read records until EOF. Bad lines are logged and skipped.
pub async fn read_records<R>(
    reader: R,
    aggregator: &MetricAggregator,
    harvester: &Harvester,
) -> Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = IngestStats::default();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_record(line).and_then(|record| apply(record, aggregator, harvester)) {
            Ok(()) => stats.accepted += 1,
            Err(e) => {
                stats.rejected += 1;
                tracing::warn!(line = line_number, error = %e, category = e.category(), "skipping record");
            },
        }
    }

    tracing::debug!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        "input exhausted"
    );
    Ok(stats)
}
