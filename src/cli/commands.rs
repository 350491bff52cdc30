//! CLI command implementations
//!
//! Boot sequence for each subcommand. Fatal initialization failures
//! (missing settings, unresolved install directory, unopenable stores)
//! surface as `CliError` and a nonzero exit; a clean shutdown exits zero.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::{AgentContext, LogBridge, Orchestrator};
use crate::hash_index::HashIndex;
use crate::history::HistoryStore;
use crate::observability::Logger;
use crate::server::{BackupServer, ServerConfig};
use crate::settings::{Settings, StableSettings};
use crate::transport::TransportClient;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Run the appropriate command based on CLI args.
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Agent {
            settings_file,
            hash_db,
            ignore_hash_db,
            server_url,
        } => run_agent(settings_file, hash_db, ignore_hash_db, &server_url),
        Command::Server { config } => run_server(&config),
    }
}

fn run_agent(
    settings_file: Option<PathBuf>,
    hash_db: Option<PathBuf>,
    ignore_hash_db: bool,
    server_url: &str,
) -> CliResult<()> {
    let install_dir = resolve_install_dir(settings_file.as_deref())?;
    let settings_path = settings_file.unwrap_or_else(|| install_dir.join("settings.cfg"));
    let hash_db_path = hash_db.unwrap_or_else(|| install_dir.join("schash.db"));

    // Settings must load at boot; later reloads tolerate transient errors.
    Settings::load(&settings_path)
        .map_err(|e| CliError::config_error(e.to_string()))?;

    let hash_index = HashIndex::open(&hash_db_path)
        .map_err(|e| CliError::store_error(format!("hash index: {}", e)))?;
    let history = HistoryStore::open(&install_dir.join("history").join("history.db"))
        .map_err(|e| CliError::store_error(format!("history store: {}", e)))?;
    let transport = TransportClient::new(server_url)
        .map_err(|e| CliError::config_error(format!("transport: {}", e)))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    install_shutdown_handler(Arc::clone(&shutdown));

    let ctx = AgentContext {
        settings_path,
        install_dir,
        hash_index: Arc::new(hash_index),
        history: Arc::new(history),
        transport: Arc::new(transport),
        ui: Arc::new(LogBridge),
        shutdown,
        ignore_hash_index: ignore_hash_db,
    };

    Orchestrator::new(ctx).run();
    Ok(())
}

fn run_server(config_path: &Path) -> CliResult<()> {
    let config = ServerConfig::load(config_path)
        .map_err(|e| CliError::config_error(format!("{}: {}", config_path.display(), e)))?;
    let server =
        BackupServer::new(config).map_err(|e| CliError::server_error(e.to_string()))?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::server_error(e.to_string()))?;
    runtime
        .block_on(server.start())
        .map_err(|e| CliError::server_error(e.to_string()))
}

/// Locate the install directory: the installer-written stable settings
/// win; a --settings-file argument falls back to its parent directory.
fn resolve_install_dir(settings_file: Option<&Path>) -> CliResult<PathBuf> {
    if let Some(stable_path) = StableSettings::default_path() {
        if stable_path.exists() {
            let stable = StableSettings::load(&stable_path)
                .map_err(|e| CliError::config_error(e.to_string()))?;
            return Ok(stable.install_dir());
        }
    }

    match settings_file.and_then(Path::parent) {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Err(CliError::install_unresolved()),
    }
}

/// Set the shutdown flag on Ctrl-C so loops wind down at the next
/// suspension point.
fn install_shutdown_handler(shutdown: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let Ok(runtime) = tokio::runtime::Runtime::new() else {
            return;
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            Logger::info("shutdown_requested", &[]);
            shutdown.store(true, Ordering::SeqCst);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stable_settings_present() -> bool {
        StableSettings::default_path().map(|p| p.exists()) == Some(true)
    }

    #[test]
    fn test_resolve_install_dir_from_settings_file() {
        if stable_settings_present() {
            return; // An installed machine resolves through stable settings.
        }
        let dir = TempDir::new().unwrap();
        let settings_path = dir.path().join("settings.cfg");
        let resolved = resolve_install_dir(Some(&settings_path)).unwrap();
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn test_resolve_install_dir_requires_some_anchor() {
        if !stable_settings_present() {
            assert!(resolve_install_dir(None).is_err());
        }
    }

    #[test]
    fn test_agent_missing_settings_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = run_agent(
            Some(dir.path().join("absent.cfg")),
            None,
            false,
            "http://127.0.0.1:9",
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "SC_CLI_CONFIG_ERROR");
    }

    #[test]
    fn test_server_missing_config_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = run_server(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code_str(), "SC_CLI_CONFIG_ERROR");
    }
}
