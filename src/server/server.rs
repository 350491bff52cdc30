//! # Backup Server
//!
//! Assembles the router over shared state and serves it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::observability::Logger;

use super::catalog::Catalog;
use super::config::ServerConfig;
use super::errors::ServerResult;
use super::routes::{api_routes, AppState};
use super::storage::StorageLayout;

/// The backup server: storage layout + catalog behind the API router.
pub struct BackupServer {
    config: ServerConfig,
    router: Router,
}

impl BackupServer {
    /// Build the server from configuration, seeding api keys.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let catalog = Catalog::open(&config.db_path)?;
        for seed in &config.api_keys {
            catalog.seed_api_key(&seed.api_key, seed.customer_id, seed.active)?;
        }

        let state = Arc::new(AppState {
            catalog,
            storage: StorageLayout::new(&config.storage_root, config.max_versions),
            max_restore_bytes: config.max_restore_bytes,
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = api_routes(state).layer(cors);
        Ok(Self { config, router })
    }

    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// The router, for in-process testing.
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the process exits.
    pub async fn start(self) -> ServerResult<()> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{}", e)))?;

        Logger::info(
            "server_listening",
            &[
                ("addr", &addr.to_string()),
                ("storage_root", &self.config.storage_root.display().to_string()),
            ],
        );

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> ServerConfig {
        serde_json::from_value(serde_json::json!({
            "storage_root": dir.path().join("storage"),
            "db_path": dir.path().join("catalog.db"),
            "port": 9999
        }))
        .unwrap()
    }

    #[test]
    fn test_server_builds_router() {
        let dir = TempDir::new().unwrap();
        let server = BackupServer::new(test_config(&dir)).unwrap();
        assert_eq!(server.socket_addr(), "0.0.0.0:9999");
        let _router = server.router();
    }
}
