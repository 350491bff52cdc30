//! # Observability
//!
//! Structured JSON logging shared by the agent and the server.

pub mod logger;

pub use logger::{Logger, Severity};
