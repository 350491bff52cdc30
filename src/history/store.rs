//! Transactional operation history
//!
//! Every backup or restore attempt is an operation row; every attempted
//! file is a file_records row owned by exactly one operation. Each mutating
//! call runs in a single transaction that also touches the operation's
//! `last_modified`, so a crash can never leave a record without its
//! bookkeeping.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::errors::{HistoryError, HistoryResult};
use super::types::{FileRecord, InitiationSource, Operation, OperationStatus, OperationType};

/// Operations still `in_progress` whose last_modified is older than this
/// when the store opens are assumed lost to a crash.
const RECOVERY_THRESHOLD_SECS: i64 = 3600;

const CRASH_RECOVERY_MESSAGE: &str = "crash recovery";

/// SQLite-backed history store. Mutating methods are one transaction each;
/// the connection is serialized behind a mutex.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the store and run crash recovery.
    pub fn open(db_path: &Path) -> HistoryResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;

             CREATE TABLE IF NOT EXISTS operations (
                 operation_id   TEXT PRIMARY KEY,
                 timestamp      TEXT NOT NULL,
                 source         TEXT NOT NULL,
                 status         TEXT NOT NULL,
                 operation_type TEXT NOT NULL,
                 user_email     TEXT,
                 error_message  TEXT,
                 last_modified  TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS file_records (
                 id            INTEGER PRIMARY KEY,
                 operation_id  TEXT NOT NULL REFERENCES operations(operation_id),
                 filepath      TEXT NOT NULL,
                 timestamp     TEXT NOT NULL,
                 status        TEXT NOT NULL,
                 error_message TEXT
             );

             CREATE INDEX IF NOT EXISTS idx_file_records_operation
                 ON file_records(operation_id);",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.recover_stale(Duration::seconds(RECOVERY_THRESHOLD_SECS))?;
        Ok(store)
    }

    /// Mark stale `in_progress` operations failed. Called on open; public
    /// so a supervisor can re-run it.
    pub fn recover_stale(&self, threshold: Duration) -> HistoryResult<usize> {
        let cutoff = (Utc::now() - threshold).to_rfc3339();
        let conn = self.conn.lock().expect("history lock poisoned");
        let changed = conn.execute(
            "UPDATE operations
             SET status = 'failed', error_message = ?1, last_modified = ?2
             WHERE status = 'in_progress' AND last_modified < ?3",
            params![CRASH_RECOVERY_MESSAGE, Utc::now().to_rfc3339(), cutoff],
        )?;
        Ok(changed)
    }

    /// Create a new operation in `in_progress` and return its id.
    pub fn start_operation(
        &self,
        operation_type: OperationType,
        source: InitiationSource,
        user_email: Option<&str>,
    ) -> HistoryResult<String> {
        let conn = self.conn.lock().expect("history lock poisoned");

        loop {
            let now = Utc::now();
            let operation_id = now.format("%Y%m%d_%H%M%S_%9f").to_string();
            let result = conn.execute(
                "INSERT INTO operations
                 (operation_id, timestamp, source, status, operation_type,
                  user_email, error_message, last_modified)
                 VALUES (?1, ?2, ?3, 'in_progress', ?4, ?5, NULL, ?2)",
                params![
                    operation_id,
                    now.to_rfc3339(),
                    source.as_str(),
                    operation_type.as_str(),
                    user_email,
                ],
            );

            match result {
                Ok(_) => return Ok(operation_id),
                // Two starts in the same nanosecond tick; take another timestamp.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Record one attempted file and touch the owning operation.
    pub fn add_file_record(
        &self,
        operation_id: &str,
        filepath: &str,
        status: OperationStatus,
        error_message: Option<&str>,
    ) -> HistoryResult<()> {
        let mut conn = self.conn.lock().expect("history lock poisoned");
        let tx = conn.transaction()?;

        let now = Utc::now().to_rfc3339();
        let touched = tx.execute(
            "UPDATE operations SET last_modified = ?1 WHERE operation_id = ?2",
            params![now, operation_id],
        )?;
        if touched == 0 {
            return Err(HistoryError::UnknownOperation(operation_id.to_string()));
        }

        tx.execute(
            "INSERT INTO file_records (operation_id, filepath, timestamp, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![operation_id, filepath, now, status.as_str(), error_message],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Resolve an operation. Idempotent: completing an already-terminal
    /// operation is a no-op.
    pub fn complete_operation(
        &self,
        operation_id: &str,
        final_status: OperationStatus,
        error_message: Option<&str>,
    ) -> HistoryResult<()> {
        let conn = self.conn.lock().expect("history lock poisoned");

        let changed = conn.execute(
            "UPDATE operations
             SET status = ?1, error_message = ?2, last_modified = ?3
             WHERE operation_id = ?4 AND status = 'in_progress'",
            params![
                final_status.as_str(),
                error_message,
                Utc::now().to_rfc3339(),
                operation_id
            ],
        )?;

        if changed == 0 {
            // Distinguish "already terminal" from "never existed".
            let exists: Option<String> = conn
                .query_row(
                    "SELECT status FROM operations WHERE operation_id = ?1",
                    params![operation_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(HistoryError::UnknownOperation(operation_id.to_string()));
            }
        }

        Ok(())
    }

    /// Fetch one operation with its file records.
    pub fn get_operation(&self, operation_id: &str) -> HistoryResult<Operation> {
        let conn = self.conn.lock().expect("history lock poisoned");

        let mut operation = conn
            .query_row(
                "SELECT operation_id, timestamp, source, status, operation_type,
                        user_email, error_message, last_modified
                 FROM operations WHERE operation_id = ?1",
                params![operation_id],
                row_to_operation,
            )
            .optional()?
            .ok_or_else(|| HistoryError::UnknownOperation(operation_id.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT operation_id, filepath, timestamp, status, error_message
             FROM file_records WHERE operation_id = ?1 ORDER BY id",
        )?;
        let records = stmt.query_map(params![operation_id], row_to_file_record)?;
        for record in records {
            operation.files.push(record?);
        }

        Ok(operation)
    }

    /// Page through operations of one type, newest first.
    pub fn list_history(
        &self,
        operation_type: OperationType,
        page: u32,
        page_size: u32,
    ) -> HistoryResult<Vec<Operation>> {
        let conn = self.conn.lock().expect("history lock poisoned");

        let mut stmt = conn.prepare(
            "SELECT operation_id, timestamp, source, status, operation_type,
                    user_email, error_message, last_modified
             FROM operations
             WHERE operation_type = ?1
             ORDER BY operation_id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let offset = page.saturating_mul(page_size);
        let rows = stmt.query_map(
            params![operation_type.as_str(), page_size, offset],
            row_to_operation,
        )?;

        let mut operations = Vec::new();
        for row in rows {
            operations.push(row?);
        }
        Ok(operations)
    }

    /// Count operations still in progress. Used by invariant tests.
    pub fn in_progress_count(&self) -> HistoryResult<u32> {
        let conn = self.conn.lock().expect("history lock poisoned");
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE status = 'in_progress'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    #[cfg(test)]
    fn backdate(&self, operation_id: &str, last_modified: DateTime<Utc>) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE operations SET last_modified = ?1 WHERE operation_id = ?2",
            params![last_modified.to_rfc3339(), operation_id],
        )
        .unwrap();
    }
}

fn parse_utc(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
    let source: String = row.get(2)?;
    let status: String = row.get(3)?;
    let operation_type: String = row.get(4)?;

    Ok(Operation {
        operation_id: row.get(0)?,
        timestamp: parse_utc(row.get(1)?),
        source: InitiationSource::parse(&source).unwrap_or(InitiationSource::User),
        status: OperationStatus::parse(&status).unwrap_or(OperationStatus::Failed),
        operation_type: OperationType::parse(&operation_type).unwrap_or(OperationType::Backup),
        user_email: row.get(5)?,
        error_message: row.get(6)?,
        last_modified: parse_utc(row.get(7)?),
        files: Vec::new(),
    })
}

fn row_to_file_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let status: String = row.get(3)?;
    Ok(FileRecord {
        operation_id: row.get(0)?,
        filepath: row.get(1)?,
        timestamp: parse_utc(row.get(2)?),
        status: OperationStatus::parse(&status).unwrap_or(OperationStatus::Failed),
        error_message: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> HistoryStore {
        HistoryStore::open(&dir.path().join("history").join("history.db")).unwrap()
    }

    #[test]
    fn test_start_creates_in_progress() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let id = store
            .start_operation(OperationType::Backup, InitiationSource::Realtime, None)
            .unwrap();
        let op = store.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);
        assert_eq!(op.source, InitiationSource::Realtime);
        assert_eq!(op.operation_type, OperationType::Backup);
        assert!(op.files.is_empty());
    }

    #[test]
    fn test_operation_ids_unique_and_ordered() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(
                store
                    .start_operation(OperationType::Backup, InitiationSource::Scheduled, None)
                    .unwrap(),
            );
        }
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 20);
        assert_eq!(sorted, ids);
    }

    #[test]
    fn test_file_records_attach_to_operation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let id = store
            .start_operation(OperationType::Backup, InitiationSource::Realtime, None)
            .unwrap();
        store
            .add_file_record(&id, "/tmp/a.txt", OperationStatus::Success, None)
            .unwrap();
        store
            .add_file_record(&id, "/tmp/b.txt", OperationStatus::Failed, Some("disk full"))
            .unwrap();

        let op = store.get_operation(&id).unwrap();
        assert_eq!(op.files.len(), 2);
        assert_eq!(op.files[0].filepath, "/tmp/a.txt");
        assert_eq!(op.files[1].status, OperationStatus::Failed);
        assert_eq!(op.files[1].error_message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_file_record_requires_known_operation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let err = store
            .add_file_record("missing", "/tmp/a.txt", OperationStatus::Success, None)
            .unwrap_err();
        assert!(matches!(err, HistoryError::UnknownOperation(_)));
    }

    #[test]
    fn test_complete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let id = store
            .start_operation(OperationType::Backup, InitiationSource::Realtime, None)
            .unwrap();
        store
            .complete_operation(&id, OperationStatus::Success, None)
            .unwrap();
        // Second completion must not flip the status.
        store
            .complete_operation(&id, OperationStatus::Failed, Some("late error"))
            .unwrap();

        let op = store.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Success);
        assert!(op.error_message.is_none());
    }

    #[test]
    fn test_complete_unknown_operation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store
            .complete_operation("missing", OperationStatus::Success, None)
            .is_err());
    }

    #[test]
    fn test_crash_recovery_marks_stale_failed() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("history").join("history.db");

        let stale_id;
        {
            let store = HistoryStore::open(&db_path).unwrap();
            stale_id = store
                .start_operation(OperationType::Backup, InitiationSource::Realtime, None)
                .unwrap();
            store.backdate(&stale_id, Utc::now() - Duration::hours(2));
        }

        let store = HistoryStore::open(&db_path).unwrap();
        let op = store.get_operation(&stale_id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error_message.as_deref(), Some("crash recovery"));
        assert_eq!(store.in_progress_count().unwrap(), 0);
    }

    #[test]
    fn test_recent_in_progress_survives_recovery() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("history.db");

        let id;
        {
            let store = HistoryStore::open(&db_path).unwrap();
            id = store
                .start_operation(OperationType::Backup, InitiationSource::Realtime, None)
                .unwrap();
        }

        let store = HistoryStore::open(&db_path).unwrap();
        let op = store.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);
    }

    #[test]
    fn test_list_history_pages_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = store
                .start_operation(OperationType::Backup, InitiationSource::Scheduled, None)
                .unwrap();
            store
                .complete_operation(&id, OperationStatus::Success, None)
                .unwrap();
            ids.push(id);
        }
        // A restore operation must not show up in the backup listing.
        store
            .start_operation(OperationType::Restore, InitiationSource::User, None)
            .unwrap();

        let page0 = store.list_history(OperationType::Backup, 0, 3).unwrap();
        let page1 = store.list_history(OperationType::Backup, 1, 3).unwrap();
        assert_eq!(page0.len(), 3);
        assert_eq!(page1.len(), 2);
        assert_eq!(page0[0].operation_id, ids[4]);
        assert_eq!(page1[1].operation_id, ids[0]);
    }
}
