//! Telemetry harvester - client-side aggregation and batched delivery of
//! dimensional metrics and distributed-trace spans.
//!
//! Applications record counts, gauges and summaries through a
//! [`MetricAggregator`], and spans directly on a [`Harvester`]. The harvester
//! periodically (or on demand) turns everything buffered into gzip-compressed
//! JSON batches, splits oversized batches until each request fits the ingest
//! size cap, and delivers them with a deadline-bounded retry policy.
//!
//! # Architecture
//!
//! - `core`: attributes, spans, configuration, errors, retry policy
//! - `metrics`: metric types and the aggregator
//! - `export`: batch envelopes, request splitting, HTTP transport
//! - `harvester`: buffers, scheduling and delivery
//! - `ingest`: JSON-lines records for the CLI
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use harvester_lib::core::ConfigBuilder;
//! use harvester_lib::{Harvester, MetricAggregator};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::new()
//!         .api_key("my-api-key")
//!         .harvest_period(Duration::ZERO)
//!         .build()?;
//!
//!     let aggregator = MetricAggregator::new();
//!     let harvester = Harvester::builder(config)
//!         .before_harvest(aggregator.harvest_hook())
//!         .build()?;
//!
//!     aggregator.new_count("requests", Default::default()).increment();
//!     harvester.harvest_now().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod export;
pub mod harvester;
pub mod ingest;
pub mod metrics;

// Re-export core types for convenience
pub use crate::core::{Config, HarvestError, Result, Span};
pub use crate::harvester::{BeforeHarvestHook, HarvestSummary, Harvester, HarvesterBuilder};
pub use crate::metrics::{Metric, MetricAggregator};
