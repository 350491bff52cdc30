//! Server configuration
//!
//! JSON file loaded at startup. Customer api keys are seeded into the
//! catalog from here; everything else has a default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::ServerResult;

/// One seeded customer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeySeed {
    pub api_key: String,
    pub customer_id: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Backup server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root of the per-customer storage tree.
    pub storage_root: PathBuf,

    /// Catalog database location.
    pub db_path: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Versions retained per file, including the two slots below the cap.
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,

    /// Largest body served through the non-chunked restore path.
    #[serde(default = "default_max_restore_bytes")]
    pub max_restore_bytes: u64,

    #[serde(default)]
    pub api_keys: Vec<ApiKeySeed>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_max_versions() -> u32 {
    3
}

fn default_max_restore_bytes() -> u64 {
    300 * 1024 * 1024
}

impl ServerConfig {
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
