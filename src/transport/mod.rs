//! # Transport Client
//!
//! Typed request/response over TLS+JSON with multipart uploads. Retry
//! policy lives here, not in callers: transient failures back off and
//! retry, auth failures surface immediately.

pub mod client;
pub mod errors;
pub mod retry;

pub use client::{TransportClient, STREAM_THRESHOLD_BYTES};
pub use errors::{ErrorKind, TransportError, TransportResult};
pub use retry::RetryPolicy;
