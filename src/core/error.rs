//! Error types for the harvester.

use thiserror::Error;

/// Errors produced by the harvester
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Span recorded without an id
    #[error("span id must be set")]
    SpanIdUnset,

    /// Span recorded without a trace id
    #[error("trace id must be set")]
    TraceIdUnset,

    /// Span recorded while collection is off
    #[error("spans are not enabled: api key unset")]
    SpansDisabled,

    /// A single item exceeds the request size cap
    #[error("unable to split large payload further")]
    UnableToSplit,

    /// Value not usable as an HTTP header
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed input record
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background task panicked or was cancelled
    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new ingest error
    pub fn ingest<S: Into<String>>(msg: S) -> Self {
        Self::Ingest(msg.into())
    }

    /// Returns true for errors reported synchronously by span recording.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::SpanIdUnset | Self::TraceIdUnset | Self::SpansDisabled)
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::SpanIdUnset | Self::TraceIdUnset => "validation",
            Self::SpansDisabled => "disabled",
            Self::UnableToSplit => "payload",
            Self::InvalidHeader(_) => "request",
            Self::Network(_) => "network",
            Self::Ingest(_) => "ingest",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}
