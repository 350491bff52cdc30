//! Drive monitor
//!
//! Polls for newly attached volumes about once a second. A new volume is
//! surfaced through the GUI bridge; on accept, its root is appended to
//! `recursive_backup_paths` through the settings atomic write path, and
//! "don't ask again" persists `drive_monitor_notifications: false`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::observability::Logger;
use crate::settings::Settings;

use super::bridge::{DrivePromptAnswer, UiBridge};
use super::keepalive::sleep_interruptibly;

/// Enumerates currently mounted volumes. Production uses the system
/// mount table; tests substitute a fixed list.
pub trait VolumeLister: Send + Sync {
    fn volumes(&self) -> Vec<PathBuf>;
}

/// Mount points under removable-media roots, read from the OS mount table.
#[derive(Debug, Default)]
pub struct SystemVolumes;

impl VolumeLister for SystemVolumes {
    #[cfg(target_os = "linux")]
    fn volumes(&self) -> Vec<PathBuf> {
        let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
            return Vec::new();
        };

        mounts
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .filter(|mount| {
                mount.starts_with("/media/")
                    || mount.starts_with("/mnt/")
                    || mount.starts_with("/run/media/")
            })
            .map(PathBuf::from)
            .collect()
    }

    #[cfg(not(target_os = "linux"))]
    fn volumes(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Watches for new volumes and routes prompts through the GUI bridge.
pub struct DriveMonitor {
    settings_path: PathBuf,
    lister: Arc<dyn VolumeLister>,
    ui: Arc<dyn UiBridge>,
    poll_interval: Duration,
    known: HashSet<PathBuf>,
    declined: HashSet<PathBuf>,
}

impl DriveMonitor {
    pub fn new(
        settings_path: PathBuf,
        lister: Arc<dyn VolumeLister>,
        ui: Arc<dyn UiBridge>,
    ) -> Self {
        // Volumes present at startup are not "new"; only later arrivals
        // prompt.
        let known = lister.volumes().into_iter().collect();
        Self {
            settings_path,
            lister,
            ui,
            poll_interval: Duration::from_secs(1),
            known,
            declined: HashSet::new(),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// One poll pass. Returns the volumes that were added to settings.
    pub fn poll_once(&mut self) -> Vec<PathBuf> {
        let current: HashSet<PathBuf> = self.lister.volumes().into_iter().collect();
        let new_volumes: Vec<PathBuf> = current
            .difference(&self.known)
            .filter(|v| !self.declined.contains(*v))
            .cloned()
            .collect();
        // Detached volumes may come back later and should prompt again.
        self.known = current;

        let mut accepted = Vec::new();
        for volume in new_volumes {
            if !self.notifications_enabled() {
                continue;
            }

            match self.ui.on_drive_detected(&volume) {
                DrivePromptAnswer::Accept => {
                    match Settings::update(&self.settings_path, |s| {
                        if !s.recursive_backup_paths.contains(&volume) {
                            s.recursive_backup_paths.push(volume.clone());
                        }
                    }) {
                        Ok(_) => {
                            Logger::info(
                                "drive_added_to_backup",
                                &[("volume", &volume.display().to_string())],
                            );
                            accepted.push(volume);
                        }
                        Err(e) => {
                            Logger::error(
                                "drive_settings_update_failed",
                                &[("error", &e.to_string())],
                            );
                        }
                    }
                }
                DrivePromptAnswer::Decline => {
                    self.declined.insert(volume);
                }
                DrivePromptAnswer::Suppress => {
                    if let Err(e) = Settings::update(&self.settings_path, |s| {
                        s.drive_monitor_notifications = false;
                    }) {
                        Logger::error(
                            "drive_settings_update_failed",
                            &[("error", &e.to_string())],
                        );
                    }
                }
            }
        }

        accepted
    }

    fn notifications_enabled(&self) -> bool {
        Settings::load(&self.settings_path)
            .map(|s| s.drive_monitor_notifications)
            .unwrap_or(false)
    }

    /// Run the poll loop until shutdown.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::SeqCst) {
            self.poll_once();
            sleep_interruptibly(self.poll_interval, &shutdown);
        }
    }
}

/// Spawn the monitor on its own thread.
pub fn spawn(
    settings_path: PathBuf,
    lister: Arc<dyn VolumeLister>,
    ui: Arc<dyn UiBridge>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        DriveMonitor::new(settings_path, lister, ui).run(shutdown);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeVolumes {
        volumes: Mutex<Vec<PathBuf>>,
    }

    impl FakeVolumes {
        fn new(volumes: Vec<PathBuf>) -> Arc<Self> {
            Arc::new(Self {
                volumes: Mutex::new(volumes),
            })
        }

        fn attach(&self, volume: &str) {
            self.volumes.lock().unwrap().push(PathBuf::from(volume));
        }
    }

    impl VolumeLister for FakeVolumes {
        fn volumes(&self) -> Vec<PathBuf> {
            self.volumes.lock().unwrap().clone()
        }
    }

    struct FixedAnswer {
        answer: DrivePromptAnswer,
        prompts: Mutex<Vec<PathBuf>>,
    }

    impl FixedAnswer {
        fn new(answer: DrivePromptAnswer) -> Arc<Self> {
            Arc::new(Self {
                answer,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompt_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl UiBridge for FixedAnswer {
        fn on_progress(&self, _file: &str, _percent: u8) {}
        fn on_cycle_complete(&self, _summary: &super::super::bridge::CycleSummary) {}
        fn on_drive_detected(&self, volume: &std::path::Path) -> DrivePromptAnswer {
            self.prompts.lock().unwrap().push(volume.to_path_buf());
            self.answer
        }
        fn notify(&self, _title: &str, _message: &str) {}
    }

    fn settings_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("settings.cfg");
        Settings::new("key", "agent").save(&path).unwrap();
        path
    }

    #[test]
    fn test_accept_appends_recursive_root() {
        let dir = TempDir::new().unwrap();
        let settings_path = settings_file(&dir);
        let volumes = FakeVolumes::new(vec![]);
        let ui = FixedAnswer::new(DrivePromptAnswer::Accept);

        let mut monitor = DriveMonitor::new(
            settings_path.clone(),
            volumes.clone(),
            ui.clone(),
        )
        .with_poll_interval(Duration::ZERO);

        assert!(monitor.poll_once().is_empty());

        volumes.attach("/media/usb0");
        let accepted = monitor.poll_once();
        assert_eq!(accepted, vec![PathBuf::from("/media/usb0")]);

        let settings = Settings::load(&settings_path).unwrap();
        assert!(settings
            .recursive_backup_paths
            .contains(&PathBuf::from("/media/usb0")));

        // Already-known volume does not prompt again.
        assert!(monitor.poll_once().is_empty());
        assert_eq!(ui.prompt_count(), 1);
    }

    #[test]
    fn test_decline_leaves_settings_alone() {
        let dir = TempDir::new().unwrap();
        let settings_path = settings_file(&dir);
        let volumes = FakeVolumes::new(vec![]);
        let ui = FixedAnswer::new(DrivePromptAnswer::Decline);

        let mut monitor =
            DriveMonitor::new(settings_path.clone(), volumes.clone(), ui.clone());
        volumes.attach("/media/usb0");
        assert!(monitor.poll_once().is_empty());

        let settings = Settings::load(&settings_path).unwrap();
        assert!(settings.recursive_backup_paths.is_empty());
        assert!(settings.drive_monitor_notifications);
    }

    #[test]
    fn test_suppress_persists_preference() {
        let dir = TempDir::new().unwrap();
        let settings_path = settings_file(&dir);
        let volumes = FakeVolumes::new(vec![]);
        let ui = FixedAnswer::new(DrivePromptAnswer::Suppress);

        let mut monitor =
            DriveMonitor::new(settings_path.clone(), volumes.clone(), ui.clone());
        volumes.attach("/media/usb0");
        monitor.poll_once();

        let settings = Settings::load(&settings_path).unwrap();
        assert!(!settings.drive_monitor_notifications);

        // With notifications off, further arrivals never prompt.
        volumes.attach("/media/usb1");
        monitor.poll_once();
        assert_eq!(ui.prompt_count(), 1);
    }

    #[test]
    fn test_preexisting_volumes_do_not_prompt() {
        let dir = TempDir::new().unwrap();
        let settings_path = settings_file(&dir);
        let volumes = FakeVolumes::new(vec![PathBuf::from("/media/preexisting")]);
        let ui = FixedAnswer::new(DrivePromptAnswer::Accept);

        let mut monitor = DriveMonitor::new(settings_path, volumes, ui.clone());
        monitor.poll_once();
        assert_eq!(ui.prompt_count(), 0);
    }
}
