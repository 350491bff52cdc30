//! Server catalog
//!
//! SQLite-backed record of customers, devices, the per-device file catalog
//! with version history, and the restore queue. A queue entry survives
//! until the device acknowledges the restore.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::protocol::response::{FileMetadataRecord, FileVersion, RestoreQueueEntry};

use super::errors::{ServerError, ServerResult};

/// A device without a keepalive for this long is reported offline.
const OFFLINE_AFTER_HOURS: i64 = 24;

/// Outcome of an api-key lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyStatus {
    Active { customer_id: i64 },
    Inactive,
    Unknown,
}

/// A registered device row.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: i64,
    pub customer_id: i64,
    pub agent_id: String,
    pub status: i64,
    pub last_callback: Option<DateTime<Utc>>,
    pub secret_key_path: String,
}

/// One catalogued file row.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    pub file_id: i64,
    pub device_id: i64,
    pub client_path: String,
    pub client_path_posix: String,
    pub server_path: String,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
}

/// SQLite catalog shared by all request handlers.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    pub fn open(db_path: &Path) -> ServerResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> ServerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> ServerResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;

             CREATE TABLE IF NOT EXISTS api_keys (
                 api_key     TEXT PRIMARY KEY,
                 customer_id INTEGER NOT NULL,
                 active      INTEGER NOT NULL DEFAULT 1
             );

             CREATE TABLE IF NOT EXISTS devices (
                 device_id        INTEGER PRIMARY KEY,
                 customer_id      INTEGER NOT NULL,
                 agent_id         TEXT NOT NULL UNIQUE,
                 device_name      TEXT NOT NULL,
                 ip_address       TEXT NOT NULL,
                 device_type      TEXT NOT NULL,
                 operating_system TEXT NOT NULL,
                 status           INTEGER NOT NULL DEFAULT 0,
                 last_callback    TEXT,
                 secret_key_path  TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS files (
                 file_id           INTEGER PRIMARY KEY,
                 device_id         INTEGER NOT NULL REFERENCES devices(device_id),
                 client_path       TEXT NOT NULL,
                 client_path_posix TEXT NOT NULL,
                 server_path       TEXT NOT NULL,
                 file_size         INTEGER NOT NULL,
                 last_modified     TEXT NOT NULL,
                 UNIQUE(device_id, client_path_posix)
             );

             CREATE TABLE IF NOT EXISTS file_versions (
                 id         INTEGER PRIMARY KEY,
                 file_id    INTEGER NOT NULL REFERENCES files(file_id),
                 version_id TEXT NOT NULL UNIQUE,
                 created_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS restore_queue (
                 id          INTEGER PRIMARY KEY,
                 file_id     INTEGER NOT NULL REFERENCES files(file_id),
                 version_id  TEXT,
                 queued_at   TEXT NOT NULL,
                 restored_at TEXT
             );

             CREATE INDEX IF NOT EXISTS idx_restore_queue_pending
                 ON restore_queue(file_id) WHERE restored_at IS NULL;",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- api keys ----

    pub fn seed_api_key(&self, api_key: &str, customer_id: i64, active: bool) -> ServerResult<()> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "INSERT INTO api_keys (api_key, customer_id, active)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(api_key) DO UPDATE SET
                 customer_id = excluded.customer_id,
                 active = excluded.active",
            params![api_key, customer_id, active as i64],
        )?;
        Ok(())
    }

    pub fn api_key_status(&self, api_key: &str) -> ServerResult<ApiKeyStatus> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT customer_id, active FROM api_keys WHERE api_key = ?1",
                params![api_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((customer_id, 1)) => ApiKeyStatus::Active { customer_id },
            Some((_, _)) => ApiKeyStatus::Inactive,
            None => ApiKeyStatus::Unknown,
        })
    }

    // ---- devices ----

    /// Register a device and return its row. The secret key path mirrors
    /// the server-side key layout; key material itself is not stored here.
    pub fn register_device(
        &self,
        customer_id: i64,
        device_name: &str,
        ip_address: &str,
        device_type: &str,
        operating_system: &str,
        status: i64,
    ) -> ServerResult<Device> {
        let agent_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "INSERT INTO devices
             (customer_id, agent_id, device_name, ip_address, device_type,
              operating_system, status, last_callback, secret_key_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '')",
            params![
                customer_id,
                agent_id,
                device_name,
                ip_address,
                device_type,
                operating_system,
                status,
                now.to_rfc3339(),
            ],
        )?;
        let device_id = conn.last_insert_rowid();

        let secret_key_path = format!("/keys/{}/device/{}/secret.key", customer_id, device_id);
        conn.execute(
            "UPDATE devices SET secret_key_path = ?1 WHERE device_id = ?2",
            params![secret_key_path, device_id],
        )?;

        Ok(Device {
            device_id,
            customer_id,
            agent_id,
            status,
            last_callback: Some(now),
            secret_key_path,
        })
    }

    pub fn device_by_agent_id(&self, agent_id: &str) -> ServerResult<Option<Device>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let device = conn
            .query_row(
                "SELECT device_id, customer_id, agent_id, status, last_callback, secret_key_path
                 FROM devices WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    let last_callback: Option<String> = row.get(4)?;
                    Ok(Device {
                        device_id: row.get(0)?,
                        customer_id: row.get(1)?,
                        agent_id: row.get(2)?,
                        status: row.get(3)?,
                        last_callback: last_callback.and_then(|raw| {
                            DateTime::parse_from_rfc3339(&raw)
                                .map(|t| t.with_timezone(&Utc))
                                .ok()
                        }),
                        secret_key_path: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(device)
    }

    /// Record a keepalive: update last_callback and set the device online.
    pub fn record_keepalive(&self, device_id: i64) -> ServerResult<()> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "UPDATE devices SET last_callback = ?1, status = 0 WHERE device_id = ?2",
            params![Utc::now().to_rfc3339(), device_id],
        )?;
        Ok(())
    }

    /// Agent ids of a customer's devices that have not called back within
    /// a day. Served by the device-status endpoint.
    pub fn offline_agent_ids(&self, customer_id: i64) -> ServerResult<Vec<String>> {
        let cutoff = (Utc::now() - Duration::hours(OFFLINE_AFTER_HOURS)).to_rfc3339();
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT agent_id FROM devices
             WHERE customer_id = ?1
               AND (last_callback IS NULL OR last_callback < ?2)
             ORDER BY agent_id",
        )?;
        let rows = stmt.query_map(params![customer_id, cutoff], |row| row.get(0))?;

        let mut agent_ids = Vec::new();
        for row in rows {
            agent_ids.push(row?);
        }
        Ok(agent_ids)
    }

    // ---- file catalog ----

    /// Record (or refresh) a catalogued file after a successful upload and
    /// attach a new version entry. Returns the version id.
    pub fn upsert_file(
        &self,
        device_id: i64,
        client_path: &str,
        client_path_posix: &str,
        server_path: &str,
        file_size: u64,
    ) -> ServerResult<String> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock().expect("catalog lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO files
             (device_id, client_path, client_path_posix, server_path, file_size, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(device_id, client_path_posix) DO UPDATE SET
                 client_path = excluded.client_path,
                 server_path = excluded.server_path,
                 file_size = excluded.file_size,
                 last_modified = excluded.last_modified",
            params![device_id, client_path, client_path_posix, server_path, file_size as i64, now],
        )?;

        let file_id: i64 = tx.query_row(
            "SELECT file_id FROM files WHERE device_id = ?1 AND client_path_posix = ?2",
            params![device_id, client_path_posix],
            |row| row.get(0),
        )?;

        let version_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO file_versions (file_id, version_id, created_at) VALUES (?1, ?2, ?3)",
            params![file_id, version_id, now],
        )?;

        tx.commit()?;
        Ok(version_id)
    }

    pub fn file_by_posix(
        &self,
        device_id: i64,
        client_path_posix: &str,
    ) -> ServerResult<Option<CatalogFile>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let file = conn
            .query_row(
                "SELECT file_id, device_id, client_path, client_path_posix, server_path,
                        file_size, last_modified
                 FROM files WHERE device_id = ?1 AND client_path_posix = ?2",
                params![device_id, client_path_posix],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }

    /// Recency rank of a version for a file: 0 = newest (canonical),
    /// k >= 1 lives at suffix `.SCVER<k+1>`.
    pub fn version_rank(&self, file_id: i64, version_id: &str) -> ServerResult<u32> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT version_id FROM file_versions
             WHERE file_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![file_id], |row| row.get::<_, String>(0))?;

        for (rank, row) in rows.enumerate() {
            if row? == version_id {
                return Ok(rank as u32);
            }
        }
        Err(ServerError::UnknownVersion(version_id.to_string()))
    }

    /// Full metadata for every file on a device, newest version first.
    pub fn metadata_for_device(&self, device_id: i64) -> ServerResult<Vec<FileMetadataRecord>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");

        let mut files_stmt = conn.prepare(
            "SELECT file_id, client_path_posix, file_size, last_modified
             FROM files WHERE device_id = ?1 ORDER BY client_path_posix",
        )?;
        let files = files_stmt.query_map(params![device_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut versions_stmt = conn.prepare(
            "SELECT version_id, created_at FROM file_versions
             WHERE file_id = ?1 ORDER BY id DESC",
        )?;

        let mut records = Vec::new();
        for file in files {
            let (file_id, client_path_posix, file_size, last_modified) = file?;

            let versions = versions_stmt
                .query_map(params![file_id], |row| {
                    Ok(FileVersion {
                        version_id: row.get(0)?,
                        timestamp: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            records.push(FileMetadataRecord {
                client_path_posix,
                file_size: file_size as u64,
                last_modified,
                versions,
            });
        }

        Ok(records)
    }

    // ---- restore queue ----

    /// Enqueue a restore. Idempotent while an unrestored entry exists for
    /// the same file.
    pub fn queue_restore(&self, file_id: i64, version_id: Option<&str>) -> ServerResult<()> {
        let conn = self.conn.lock().expect("catalog lock poisoned");

        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM restore_queue WHERE file_id = ?1 AND restored_at IS NULL",
            params![file_id],
            |row| row.get(0),
        )?;
        if pending > 0 {
            return Ok(());
        }

        conn.execute(
            "INSERT INTO restore_queue (file_id, version_id, queued_at) VALUES (?1, ?2, ?3)",
            params![file_id, version_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Pending restores for a device, oldest first.
    pub fn pending_restores(&self, device_id: i64) -> ServerResult<Vec<RestoreQueueEntry>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT f.client_path_posix, q.version_id
             FROM restore_queue q
             JOIN files f ON f.file_id = q.file_id
             WHERE f.device_id = ?1 AND q.restored_at IS NULL
             ORDER BY q.id",
        )?;
        let rows = stmt.query_map(params![device_id], |row| {
            Ok(RestoreQueueEntry {
                path: row.get(0)?,
                version_id: row.get(1)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Acknowledge a completed restore. Returns how many entries cleared.
    pub fn mark_restored(&self, device_id: i64, client_path_posix: &str) -> ServerResult<usize> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let changed = conn.execute(
            "UPDATE restore_queue SET restored_at = ?1
             WHERE restored_at IS NULL AND file_id IN (
                 SELECT file_id FROM files
                 WHERE device_id = ?2 AND client_path_posix = ?3
             )",
            params![Utc::now().to_rfc3339(), device_id, client_path_posix],
        )?;
        Ok(changed)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogFile> {
    let last_modified: String = row.get(6)?;
    Ok(CatalogFile {
        file_id: row.get(0)?,
        device_id: row.get(1)?,
        client_path: row.get(2)?,
        client_path_posix: row.get(3)?,
        server_path: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        last_modified: DateTime::parse_from_rfc3339(&last_modified)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}
