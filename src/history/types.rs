//! History record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who initiated an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiationSource {
    Realtime,
    Scheduled,
    User,
}

impl InitiationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiationSource::Realtime => "realtime",
            InitiationSource::Scheduled => "scheduled",
            InitiationSource::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "realtime" => Some(InitiationSource::Realtime),
            "scheduled" => Some(InitiationSource::Scheduled),
            "user" => Some(InitiationSource::User),
            _ => None,
        }
    }
}

/// Lifecycle state of an operation or file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    InProgress,
    Success,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Success => "success",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(OperationStatus::InProgress),
            "success" => Some(OperationStatus::Success),
            "failed" => Some(OperationStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

/// What kind of operation ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Backup,
    Restore,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Backup => "backup",
            OperationType::Restore => "restore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "backup" => Some(OperationType::Backup),
            "restore" => Some(OperationType::Restore),
            _ => None,
        }
    }
}

/// One attempted file within an operation. Unchanged files are never
/// recorded; only attempted files produce records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub operation_id: String,
    pub filepath: String,
    pub timestamp: DateTime<Utc>,
    pub status: OperationStatus,
    pub error_message: Option<String>,
}

/// One backup or restore attempt, owning zero or more file records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: InitiationSource,
    pub status: OperationStatus,
    pub operation_type: OperationType,
    pub user_email: Option<String>,
    pub error_message: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub files: Vec<FileRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            OperationStatus::InProgress,
            OperationStatus::Success,
            OperationStatus::Failed,
        ] {
            assert_eq!(OperationStatus::parse(status.as_str()), Some(status));
        }
        assert!(OperationStatus::parse("done").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OperationStatus::InProgress.is_terminal());
        assert!(OperationStatus::Success.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }

    #[test]
    fn test_source_round_trip() {
        for source in [
            InitiationSource::Realtime,
            InitiationSource::Scheduled,
            InitiationSource::User,
        ] {
            assert_eq!(InitiationSource::parse(source.as_str()), Some(source));
        }
    }
}
