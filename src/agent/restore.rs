//! Restore worker
//!
//! Consumes entries from the server's restore queue. Small files come back
//! in one request; larger ones are fetched as 16 MiB ranges with chunk
//! files and a JSON progress sidecar, so a crashed download resumes where
//! it stopped. The target file only ever changes by one atomic rename.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::observability::Logger;
use crate::protocol::response::RestoreQueueEntry;
use crate::protocol::ClientPath;
use crate::transport::TransportClient;

use super::bridge::UiBridge;
use super::errors::{AgentError, AgentResult};

/// Files at or below this size restore in a single request.
pub const SINGLE_SHOT_LIMIT: u64 = 16 * 1024 * 1024;

/// Range size for chunked restores.
pub const RESTORE_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Persisted chunk progress, stored at `<target>.temp.progress`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub chunks: BTreeSet<u64>,
    pub total_size: u64,
}

impl ChunkProgress {
    pub fn load(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = serde_json::to_string(self).expect("progress serializes");
        fs::write(path, text)
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_size.div_ceil(RESTORE_CHUNK_SIZE)
    }

    pub fn percent_done(&self) -> u8 {
        let total = self.total_chunks().max(1);
        ((self.chunks.len() as u64 * 100) / total).min(100) as u8
    }
}

/// Sidecar and chunk-directory locations for a restore target.
pub fn sidecar_paths(target: &Path) -> (PathBuf, PathBuf) {
    let display = target.display();
    (
        PathBuf::from(format!("{}.temp", display)),
        PathBuf::from(format!("{}.temp.progress", display)),
    )
}

/// Downloads queued files and writes them into place.
pub struct RestoreWorker<'a> {
    pub transport: &'a TransportClient,
    pub api_key: &'a str,
    pub agent_id: &'a str,
    pub ui: &'a dyn UiBridge,
}

impl RestoreWorker<'_> {
    /// Restore one queue entry to its original path.
    pub fn restore_entry(&self, entry: &RestoreQueueEntry) -> AgentResult<()> {
        let client_path = ClientPath::new(&entry.path);
        let target = PathBuf::from(&entry.path);
        let version_id = entry.version_id.as_deref();

        let size = self
            .transport
            .restore_info(self.api_key, self.agent_id, &client_path)?;

        if size <= SINGLE_SHOT_LIMIT {
            let bytes = self
                .transport
                .restore(self.api_key, self.agent_id, &client_path, version_id)?;
            write_restored(&target, &bytes)?;
            self.ui.on_progress(&entry.path, 100);
        } else {
            self.restore_chunked(&client_path, &target, version_id, size)?;
        }

        Logger::info(
            "file_restored",
            &[("path", &entry.path), ("bytes", &size.to_string())],
        );
        Ok(())
    }

    fn restore_chunked(
        &self,
        client_path: &ClientPath,
        target: &Path,
        version_id: Option<&str>,
        size: u64,
    ) -> AgentResult<()> {
        let (chunk_dir, progress_path) = sidecar_paths(target);
        fs::create_dir_all(&chunk_dir)?;

        let mut progress = match ChunkProgress::load(&progress_path) {
            // A stale sidecar for a different version of the file is void.
            Some(p) if p.total_size == size => p,
            _ => ChunkProgress {
                chunks: BTreeSet::new(),
                total_size: size,
            },
        };
        progress.save(&progress_path)?;

        for chunk in 0..progress.total_chunks() {
            if progress.chunks.contains(&chunk) {
                continue;
            }

            let offset = chunk * RESTORE_CHUNK_SIZE;
            let length = RESTORE_CHUNK_SIZE.min(size - offset);
            let bytes = self.transport.restore_range(
                self.api_key,
                self.agent_id,
                client_path,
                version_id,
                offset,
                length,
            )?;
            if bytes.len() as u64 != length {
                return Err(AgentError::restore(
                    target.display().to_string(),
                    format!("short chunk {}: {} of {} bytes", chunk, bytes.len(), length),
                ));
            }

            fs::write(chunk_path(&chunk_dir, chunk), &bytes)?;
            progress.chunks.insert(chunk);
            progress.save(&progress_path)?;
            self.ui
                .on_progress(&target.display().to_string(), progress.percent_done());
        }

        assemble_chunks(&chunk_dir, progress.total_chunks(), target)?;

        // Success: clear the resume state.
        let _ = fs::remove_dir_all(&chunk_dir);
        let _ = fs::remove_file(&progress_path);
        Ok(())
    }
}

fn chunk_path(chunk_dir: &Path, chunk: u64) -> PathBuf {
    chunk_dir.join(format!("chunk_{:08}", chunk))
}

/// Concatenate chunk files into `<target>.tmp`, then rename into place.
pub fn assemble_chunks(chunk_dir: &Path, total_chunks: u64, target: &Path) -> std::io::Result<()> {
    let tmp = PathBuf::from(format!("{}.tmp", target.display()));
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let mut out = File::create(&tmp)?;
        let mut buf = Vec::new();
        for chunk in 0..total_chunks {
            buf.clear();
            File::open(chunk_path(chunk_dir, chunk))?.read_to_end(&mut buf)?;
            out.write_all(&buf)?;
        }
        out.sync_all()?;
    }

    fs::rename(&tmp, target)?;
    Ok(())
}

/// Write a fully downloaded body to `<target>.tmp` and rename into place,
/// creating parent directories as needed.
pub fn write_restored(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = PathBuf::from(format!("{}.tmp", target.display()));
    {
        let mut out = File::create(&tmp)?;
        out.write_all(bytes)?;
        out.sync_all()?;
    }
    fs::rename(&tmp, target)?;
    Ok(())
}
