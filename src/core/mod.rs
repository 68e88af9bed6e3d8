//! Core domain types shared by the aggregator, the batch builders and the
//! harvester.

#![warn(missing_docs)]

pub mod attributes;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use attributes::{AttributeValue, Attributes};
pub use config::{Config, ConfigBuilder};
pub use error::{HarvestError, Result};
pub use retry::{RetryDecision, RetryPolicy};
pub use types::{Span, SpanBuilder};
