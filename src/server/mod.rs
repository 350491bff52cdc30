//! # Server
//!
//! The backup server: request routing and validation, the per-device
//! storage layout with version rotation, and the catalog holding devices,
//! file metadata, and the restore queue.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod routes;
pub mod server;
pub mod storage;

pub use catalog::{ApiKeyStatus, Catalog, Device};
pub use config::ServerConfig;
pub use errors::{ServerError, ServerResult};
pub use routes::{api_routes, AppState};
pub use server::BackupServer;
pub use storage::{StorageLayout, CHUNK_SIZE};
