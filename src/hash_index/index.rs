//! Persistent content digest index
//!
//! Change detection is "did the content digest change since the last
//! successful upload". Mtime alone is unreliable (editors preserve it), so
//! the digest is authoritative; size and mtime are stored only as a cheap
//! early reject before hashing.
//!
//! Entries are updated on successful upload only. A failed upload leaves
//! the stored entry untouched so the file is retried next cycle.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::errors::{IndexError, IndexResult};

/// Stored state for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub digest: Vec<u8>,
    pub size: u64,
    /// Modification time in nanoseconds since the epoch.
    pub mtime_ns: i64,
}

/// What a cycle should do with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    /// Size+mtime or digest matched the stored entry; skip, record nothing.
    Unchanged,
    /// New or modified content; upload it.
    Upload,
}

/// Persistent map from absolute path to last-uploaded content state.
///
/// Writes are serialized behind a mutex; the store is a single SQLite file
/// created on first open.
pub struct HashIndex {
    conn: Mutex<Connection>,
}

impl HashIndex {
    /// Open (or create) the index at `db_path`. Idempotent.
    pub fn open(db_path: &Path) -> IndexResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| IndexError::file_io(parent.display().to_string(), e))?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA busy_timeout=5000;

             CREATE TABLE IF NOT EXISTS files (
                 path     TEXT PRIMARY KEY,
                 digest   BLOB NOT NULL,
                 size     INTEGER NOT NULL,
                 mtime_ns INTEGER NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn lookup(&self, path: &str) -> IndexResult<Option<IndexEntry>> {
        let conn = self.conn.lock().expect("hash index lock poisoned");
        let entry = conn
            .query_row(
                "SELECT digest, size, mtime_ns FROM files WHERE path = ?1",
                params![path],
                |row| {
                    Ok(IndexEntry {
                        digest: row.get(0)?,
                        size: row.get::<_, i64>(1)? as u64,
                        mtime_ns: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Upsert the entry for a path. Called only after the server has
    /// acknowledged the upload.
    pub fn record(&self, path: &str, digest: &[u8], size: u64, mtime_ns: i64) -> IndexResult<()> {
        let conn = self.conn.lock().expect("hash index lock poisoned");
        conn.execute(
            "INSERT INTO files (path, digest, size, mtime_ns)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 digest = excluded.digest,
                 size = excluded.size,
                 mtime_ns = excluded.mtime_ns",
            params![path, digest, size as i64, mtime_ns],
        )?;
        Ok(())
    }

    /// Refresh size/mtime for a path whose digest is unchanged, so the
    /// cheap early-reject works on the next cycle.
    pub fn touch(&self, path: &str, size: u64, mtime_ns: i64) -> IndexResult<()> {
        let conn = self.conn.lock().expect("hash index lock poisoned");
        conn.execute(
            "UPDATE files SET size = ?2, mtime_ns = ?3 WHERE path = ?1",
            params![path, size as i64, mtime_ns],
        )?;
        Ok(())
    }

    /// Apply the decision policy for one on-disk file.
    ///
    /// 1. size and mtime both match the stored entry: unchanged, no hashing.
    /// 2. digest matches: refresh size/mtime, unchanged.
    /// 3. otherwise: upload (the new digest is returned for recording after
    ///    a successful upload).
    pub fn evaluate(&self, path: &Path) -> IndexResult<(FileDisposition, FileState)> {
        let key = path.display().to_string();
        let state = FileState::probe(path)?;

        let stored = self.lookup(&key)?;
        if let Some(stored) = &stored {
            if stored.size == state.size && stored.mtime_ns == state.mtime_ns {
                return Ok((FileDisposition::Unchanged, state));
            }
        }

        let state = state.with_digest(path)?;
        if let Some(stored) = &stored {
            if stored.digest == state.digest {
                self.touch(&key, state.size, state.mtime_ns)?;
                return Ok((FileDisposition::Unchanged, state));
            }
        }

        Ok((FileDisposition::Upload, state))
    }
}

/// Observed on-disk state of a file during evaluation.
#[derive(Debug, Clone)]
pub struct FileState {
    pub size: u64,
    pub mtime_ns: i64,
    /// Empty until hashing was necessary.
    pub digest: Vec<u8>,
}

impl FileState {
    /// Observe a file with its digest computed, bypassing the index. Used
    /// when change detection is disabled.
    pub fn observe(path: &Path) -> IndexResult<Self> {
        Self::probe(path)?.with_digest(path)
    }

    fn probe(path: &Path) -> IndexResult<Self> {
        let meta = std::fs::metadata(path)
            .map_err(|e| IndexError::file_io(path.display().to_string(), e))?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Ok(Self {
            size: meta.len(),
            mtime_ns,
            digest: Vec::new(),
        })
    }

    fn with_digest(mut self, path: &Path) -> IndexResult<Self> {
        self.digest = sha256_file(path)?;
        Ok(self)
    }
}

/// Stream a file through SHA-256.
pub fn sha256_file(path: &Path) -> IndexResult<Vec<u8>> {
    let mut file =
        File::open(path).map_err(|e| IndexError::file_io(path.display().to_string(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| IndexError::file_io(path.display().to_string(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_vec())
}
