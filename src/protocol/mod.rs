//! # Wire Protocol
//!
//! Canonical wire schema shared by the transport client and the request
//! router: the `request_type` tag, one typed record per request and
//! response, and the [`ClientPath`] value type that owns base64 encoding
//! and posix normalization of device paths.

pub mod errors;
pub mod path;
pub mod request;
pub mod response;

pub use errors::{ProtocolError, ProtocolResult};
pub use path::ClientPath;
pub use request::RequestType;
