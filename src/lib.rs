//! stormcloud - client/server endpoint backup engine
//!
//! The agent walks configured paths, skips unchanged files via a content
//! digest index, and streams changed files to the server, which keeps
//! rotated versions per device and serves restores through the keepalive
//! channel.

pub mod agent;
pub mod cli;
pub mod hash_index;
pub mod history;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod transport;
