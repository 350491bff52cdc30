//! GUI bridge
//!
//! The core talks to the desktop shell through this narrow interface.
//! Headless runs use [`LogBridge`], which turns every callback into a log
//! line.

use std::path::Path;

use crate::observability::Logger;

/// User's answer to a newly attached drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivePromptAnswer {
    /// Add the drive to the recursive backup roots.
    Accept,
    /// Skip this drive, ask again next time.
    Decline,
    /// Never ask again (persisted in settings).
    Suppress,
}

/// Outcome summary handed to the shell after each cycle.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub source: String,
    pub success: bool,
    pub files_attempted: u32,
    pub files_failed: u32,
}

/// Callbacks from the core into the desktop shell.
pub trait UiBridge: Send + Sync {
    /// Per-file progress within a cycle, percent in [0, 100].
    fn on_progress(&self, file: &str, percent: u8);

    fn on_cycle_complete(&self, summary: &CycleSummary);

    /// A new volume appeared. The default answer is Decline: prompts that
    /// time out must not grow the backup set.
    fn on_drive_detected(&self, volume: &Path) -> DrivePromptAnswer;

    /// Best-effort toast.
    fn notify(&self, title: &str, message: &str);
}

/// Bridge for headless operation; logs instead of prompting.
#[derive(Debug, Default)]
pub struct LogBridge;

impl UiBridge for LogBridge {
    fn on_progress(&self, file: &str, percent: u8) {
        Logger::debug(
            "backup_progress",
            &[("file", file), ("percent", &percent.to_string())],
        );
    }

    fn on_cycle_complete(&self, summary: &CycleSummary) {
        Logger::info(
            "cycle_complete",
            &[
                ("source", &summary.source),
                ("success", if summary.success { "true" } else { "false" }),
                ("files_attempted", &summary.files_attempted.to_string()),
                ("files_failed", &summary.files_failed.to_string()),
            ],
        );
    }

    fn on_drive_detected(&self, volume: &Path) -> DrivePromptAnswer {
        Logger::info(
            "drive_detected",
            &[("volume", &volume.display().to_string())],
        );
        DrivePromptAnswer::Decline
    }

    fn notify(&self, title: &str, message: &str) {
        Logger::info("notify", &[("title", title), ("message", message)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_bridge_declines_drives() {
        let bridge = LogBridge;
        assert_eq!(
            bridge.on_drive_detected(Path::new("/media/usb0")),
            DrivePromptAnswer::Decline
        );
    }
}
