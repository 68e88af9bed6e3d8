//! Span type and its wire representation.

use crate::core::attributes::{vet, AttributeValue, Attributes};
use crate::core::wire::{duration_millis_f64, epoch_millis, serialize_number};
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime};

/// Attribute keys written by the span itself. User attributes with these
/// keys are dropped.
const RESERVED_SPAN_KEYS: [&str; 4] = ["name", "parent.id", "duration.ms", "service.name"];

/// Represents a single span in a distributed trace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Span {
    /// Unique identifier for this span
    pub id: String,
    /// Identifier shared by all spans of one trace
    pub trace_id: String,
    /// When the span started; filled with the current time when recorded
    pub timestamp: Option<SystemTime>,
    /// Name of the operation this span represents
    pub name: Option<String>,
    /// Parent span ID if this is a child span
    pub parent_id: Option<String>,
    /// How long the span took to complete
    pub duration: Option<Duration>,
    /// Name of the service that generated this span
    pub service_name: Option<String>,
    /// Key-value attributes associated with the span
    pub attributes: Attributes,
}

impl Span {
    /// Creates a new span builder
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// Returns true if this span is a root span (has no parent)
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Gets an attribute value by key
    pub fn get_attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

#[derive(serde::Serialize)]
struct WireSpanAttributes<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(rename = "parent.id", skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
    #[serde(
        rename = "duration.ms",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_number"
    )]
    duration_ms: Option<f64>,
    #[serde(rename = "service.name", skip_serializing_if = "Option::is_none")]
    service_name: Option<&'a str>,
    #[serde(flatten)]
    user: Map<String, Value>,
}

#[derive(serde::Serialize)]
struct WireSpan<'a> {
    id: &'a str,
    #[serde(rename = "trace.id")]
    trace_id: &'a str,
    timestamp: i64,
    attributes: WireSpanAttributes<'a>,
}

fn serialize_optional_number<S: Serializer>(
    value: &Option<f64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_number(v, serializer),
        None => serializer.serialize_none(),
    }
}

impl Serialize for Span {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut user = vet(&self.attributes);
        for key in RESERVED_SPAN_KEYS {
            if user.remove(key).is_some() {
                tracing::debug!(attribute = key, span_id = %self.id, "dropping reserved span attribute");
            }
        }

        WireSpan {
            id: &self.id,
            trace_id: &self.trace_id,
            timestamp: self.timestamp.map_or(0, epoch_millis),
            attributes: WireSpanAttributes {
                name: self.name.as_deref(),
                parent_id: self.parent_id.as_deref(),
                duration_ms: self
                    .duration
                    .filter(|d| !d.is_zero())
                    .map(duration_millis_f64),
                service_name: self.service_name.as_deref(),
                user,
            },
        }
        .serialize(serializer)
    }
}

/// Builder for creating Span instances
#[derive(Default)]
pub struct SpanBuilder {
    span: Span,
}

impl SpanBuilder {
    /// Set the span id
    pub fn id<S: Into<String>>(mut self, id: S) -> Self {
        self.span.id = id.into();
        self
    }

    /// Set the trace id
    pub fn trace_id<S: Into<String>>(mut self, trace_id: S) -> Self {
        self.span.trace_id = trace_id.into();
        self
    }

    /// Set the parent span id
    pub fn parent_id<S: Into<String>>(mut self, parent_id: S) -> Self {
        self.span.parent_id = Some(parent_id.into());
        self
    }

    /// Set the operation name
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.span.name = Some(name.into());
        self
    }

    /// Set the service name
    pub fn service_name<S: Into<String>>(mut self, service_name: S) -> Self {
        self.span.service_name = Some(service_name.into());
        self
    }

    /// Set the start time
    pub fn timestamp(mut self, timestamp: SystemTime) -> Self {
        self.span.timestamp = Some(timestamp);
        self
    }

    /// Set how long the span took
    pub fn duration(mut self, duration: Duration) -> Self {
        self.span.duration = Some(duration);
        self
    }

    /// Add a custom attribute
    pub fn attribute<K: Into<String>, V: Into<AttributeValue>>(mut self, key: K, value: V) -> Self {
        self.span.attributes.insert(key.into(), value.into());
        self
    }

    /// Finishes the span. Required fields are checked when it is recorded.
    pub fn build(self) -> Span {
        self.span
    }
}
