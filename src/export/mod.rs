//! Wire export: batch envelopes, request building and HTTP delivery.
//!
//! Harvested data flows through here in order: a [`Batch`] is serialized,
//! gzip-compressed and wrapped in a [`Request`], split recursively while the
//! compressed body exceeds [`MAX_COMPRESSED_SIZE_BYTES`], and sent through a
//! [`Transport`].

pub mod batch;
pub mod compression;
pub mod request;
pub mod transport;

pub use batch::{common_attributes, Batch, CommonAttributes, MetricBatch, SpanBatch};
pub use request::{
    build_requests, build_requests_with_limit, new_request, Endpoint, Request,
    MAX_COMPRESSED_SIZE_BYTES, USER_AGENT_VALUE,
};
pub use transport::{HttpTransport, Response, Transport};
