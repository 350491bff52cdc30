//! File-metadata manifests
//!
//! After each cycle the agent snapshots the server-visible catalog to
//! `<install>/file_explorer/manifest/file_metadata_YYYYMMDD_HHMMSS.json`
//! and keeps only the most recent ten.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};

use crate::observability::Logger;
use crate::protocol::response::FileMetadataRecord;
use crate::transport::TransportClient;

use super::errors::AgentResult;

/// Manifests retained after pruning.
pub const MAX_MANIFESTS: usize = 10;

const FILE_PREFIX: &str = "file_metadata_";
const FILE_FORMAT: &str = "file_metadata_%Y%m%d_%H%M%S.json";

/// Manifest directory under an install root.
pub fn manifest_dir(install_dir: &Path) -> PathBuf {
    install_dir.join("file_explorer").join("manifest")
}

/// Fetch the catalog and write a snapshot, then prune old snapshots.
/// Failures are logged, not fatal: the next cycle writes a fresh one.
pub fn snapshot(
    transport: &TransportClient,
    api_key: &str,
    agent_id: &str,
    install_dir: &Path,
) {
    let records = match transport.file_metadata(api_key, agent_id) {
        Ok(records) => records,
        Err(e) => {
            Logger::warn("manifest_fetch_failed", &[("error", &e.to_string())]);
            return;
        }
    };

    match write_snapshot(&records, install_dir) {
        Ok(path) => {
            Logger::info(
                "manifest_written",
                &[
                    ("path", &path.display().to_string()),
                    ("records", &records.len().to_string()),
                ],
            );
        }
        Err(e) => {
            Logger::warn("manifest_write_failed", &[("error", &e.to_string())]);
        }
    }
}

/// Write one snapshot file and prune. Returns the written path.
pub fn write_snapshot(
    records: &[FileMetadataRecord],
    install_dir: &Path,
) -> AgentResult<PathBuf> {
    let dir = manifest_dir(install_dir);
    fs::create_dir_all(&dir)?;

    let name = Utc::now().format(FILE_FORMAT).to_string();
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(records).expect("records serialize");
    fs::write(&path, body)?;

    prune(&dir, MAX_MANIFESTS)?;
    Ok(path)
}

/// Remove all but the newest `keep` manifests, ordered by the timestamp
/// embedded in the file name. Files that do not match the pattern are
/// left alone.
pub fn prune(dir: &Path, keep: usize) -> AgentResult<()> {
    let mut manifests: Vec<(NaiveDateTime, PathBuf)> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(FILE_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        if let Ok(stamp) = NaiveDateTime::parse_from_str(&name, FILE_FORMAT) {
            manifests.push((stamp, entry.path()));
        }
    }

    manifests.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in manifests.into_iter().skip(keep) {
        if let Err(e) = fs::remove_file(&path) {
            Logger::warn(
                "manifest_prune_failed",
                &[("path", &path.display().to_string()), ("error", &e.to_string())],
            );
        }
    }

    Ok(())
}
