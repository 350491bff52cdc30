//! Typed settings model
//!
//! The settings file is both read and written by the agent: the main loop
//! re-reads it every tick, and the drive monitor appends backup roots
//! through it. Writes always go temp-file-then-rename so a reload never
//! observes a half-written file.

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{SettingsError, SettingsResult};
use super::parse::{parse_document, render_document, ConfigValue};
use super::schedule::{
    parse_time, parse_weekday, weekday_name, BackupSchedule, MonthlyDay,
};

/// Dispatch policy for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    Realtime,
    Scheduled,
}

impl BackupMode {
    pub fn parse(s: &str) -> SettingsResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "realtime" => Ok(BackupMode::Realtime),
            "scheduled" => Ok(BackupMode::Scheduled),
            _ => Err(SettingsError::invalid("backup_mode", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMode::Realtime => "realtime",
            BackupMode::Scheduled => "scheduled",
        }
    }
}

/// Agent settings, reloaded on every orchestrator tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: String,
    pub agent_id: String,
    pub backup_mode: BackupMode,
    /// Roots scanned to depth 1 (files directly inside only).
    pub backup_paths: Vec<PathBuf>,
    /// Roots walked depth-first.
    pub recursive_backup_paths: Vec<PathBuf>,
    pub keepalive_freq_seconds: u64,
    pub backup_schedule: BackupSchedule,
    pub send_logs: bool,
    pub drive_monitor_notifications: bool,
}

impl Settings {
    pub fn new(api_key: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            agent_id: agent_id.into(),
            backup_mode: BackupMode::Realtime,
            backup_paths: Vec::new(),
            recursive_backup_paths: Vec::new(),
            keepalive_freq_seconds: 300,
            backup_schedule: BackupSchedule::default(),
            send_logs: false,
            drive_monitor_notifications: true,
        }
    }

    /// Load settings from disk. A missing file is a fatal configuration
    /// error, not an empty configuration.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.display().to_string()));
        }
        let text = fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    pub fn from_text(text: &str) -> SettingsResult<Self> {
        let doc = parse_document(text)?;
        let mut settings = Settings::new("", "");
        let mut saw_api_key = false;
        let mut saw_agent_id = false;

        for (key, value) in &doc {
            match key.as_str() {
                "api_key" => {
                    settings.api_key = require_scalar(key, value)?.to_string();
                    saw_api_key = true;
                }
                "agent_id" => {
                    settings.agent_id = require_scalar(key, value)?.to_string();
                    saw_agent_id = true;
                }
                "backup_mode" => {
                    settings.backup_mode = BackupMode::parse(require_scalar(key, value)?)?;
                }
                "backup_paths" => {
                    settings.backup_paths = path_list(key, value)?;
                }
                "recursive_backup_paths" => {
                    settings.recursive_backup_paths = path_list(key, value)?;
                }
                "keepalive_freq_seconds" => {
                    let raw = require_scalar(key, value)?;
                    let freq: u64 = raw
                        .parse()
                        .map_err(|_| SettingsError::invalid("keepalive_freq_seconds", raw))?;
                    if freq == 0 {
                        return Err(SettingsError::invalid("keepalive_freq_seconds", raw));
                    }
                    settings.keepalive_freq_seconds = freq;
                }
                "backup_schedule" => {
                    settings.backup_schedule = parse_schedule(value)?;
                }
                "send_logs" => {
                    settings.send_logs = parse_bool("send_logs", require_scalar(key, value)?)?;
                }
                "drive_monitor_notifications" => {
                    settings.drive_monitor_notifications =
                        parse_bool("drive_monitor_notifications", require_scalar(key, value)?)?;
                }
                // Unknown keys are ignored so older agents tolerate newer files.
                _ => {}
            }
        }

        if !saw_api_key || settings.api_key.is_empty() {
            return Err(SettingsError::MissingKey("api_key"));
        }
        if !saw_agent_id || settings.agent_id.is_empty() {
            return Err(SettingsError::MissingKey("agent_id"));
        }

        Ok(settings)
    }

    /// Write settings atomically: render to a temp file in the same
    /// directory, then rename over the target.
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        let rendered = self.render();
        let tmp = path.with_extension("cfg.tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, rendered.as_bytes())?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read-modify-write helper used by the drive monitor.
    pub fn update<F>(path: &Path, mutate: F) -> SettingsResult<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = Settings::load(path)?;
        mutate(&mut settings);
        settings.save(path)?;
        Ok(settings)
    }

    pub fn render(&self) -> String {
        let mut doc: Vec<(String, ConfigValue)> = vec![
            ("api_key".into(), ConfigValue::Scalar(self.api_key.clone())),
            ("agent_id".into(), ConfigValue::Scalar(self.agent_id.clone())),
            (
                "backup_mode".into(),
                ConfigValue::Scalar(self.backup_mode.as_str().into()),
            ),
            (
                "keepalive_freq_seconds".into(),
                ConfigValue::Scalar(self.keepalive_freq_seconds.to_string()),
            ),
            (
                "send_logs".into(),
                ConfigValue::Scalar(render_bool(self.send_logs).into()),
            ),
            (
                "drive_monitor_notifications".into(),
                ConfigValue::Scalar(render_bool(self.drive_monitor_notifications).into()),
            ),
            (
                "backup_paths".into(),
                ConfigValue::List(
                    self.backup_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                ),
            ),
            (
                "recursive_backup_paths".into(),
                ConfigValue::List(
                    self.recursive_backup_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                ),
            ),
        ];

        if !self.backup_schedule.is_empty() {
            doc.push(("backup_schedule".into(), render_schedule(&self.backup_schedule)));
        }

        render_document(&doc)
    }
}

fn require_scalar<'a>(key: &str, value: &'a ConfigValue) -> SettingsResult<&'a str> {
    value
        .as_scalar()
        .ok_or_else(|| SettingsError::parse(0, format!("expected scalar for '{}'", key)))
}

fn path_list(key: &str, value: &ConfigValue) -> SettingsResult<Vec<PathBuf>> {
    let items = value
        .as_list()
        .ok_or_else(|| SettingsError::parse(0, format!("expected list for '{}'", key)))?;
    Ok(items.iter().map(PathBuf::from).collect())
}

fn parse_bool(key: &'static str, raw: &str) -> SettingsResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SettingsError::invalid(key, raw)),
    }
}

fn render_bool(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

fn parse_schedule(value: &ConfigValue) -> SettingsResult<BackupSchedule> {
    let mut schedule = BackupSchedule::default();
    let entries = value
        .as_map()
        .ok_or_else(|| SettingsError::parse(0, "expected map for 'backup_schedule'"))?;

    for (section, section_value) in entries {
        let days = section_value
            .as_map()
            .ok_or_else(|| SettingsError::parse(0, format!("expected map for '{}'", section)))?;

        match section.as_str() {
            "weekly" => {
                for (day, times) in days {
                    let weekday = parse_weekday(day)?;
                    for t in times.as_list().unwrap_or(&[]) {
                        schedule.add_weekly(weekday, parse_time(t)?);
                    }
                }
            }
            "monthly" => {
                for (day, times) in days {
                    let monthly = MonthlyDay::parse(day)?;
                    for t in times.as_list().unwrap_or(&[]) {
                        schedule.add_monthly(monthly, parse_time(t)?);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(schedule)
}

fn render_schedule(schedule: &BackupSchedule) -> ConfigValue {
    use chrono::Weekday;

    let mut sections = Vec::new();

    if !schedule.weekly.is_empty() {
        let mut days = Vec::new();
        for day in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            if let Some(times) = schedule.weekly.get(&day) {
                days.push((
                    weekday_name(day).to_string(),
                    ConfigValue::List(times.iter().map(|t| t.format("%H:%M").to_string()).collect()),
                ));
            }
        }
        sections.push(("weekly".to_string(), ConfigValue::Map(days)));
    }

    if !schedule.monthly.is_empty() {
        let mut keys: Vec<MonthlyDay> = schedule.monthly.keys().copied().collect();
        keys.sort_by_key(|k| match k {
            MonthlyDay::Day(d) => *d,
            MonthlyDay::LastDay => u32::MAX,
        });

        let mut days = Vec::new();
        for key in keys {
            let times = &schedule.monthly[&key];
            days.push((
                key.render(),
                ConfigValue::List(times.iter().map(|t| t.format("%H:%M").to_string()).collect()),
            ));
        }
        sections.push(("monthly".to_string(), ConfigValue::Map(days)));
    }

    ConfigValue::Map(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use tempfile::TempDir;

    const FULL: &str = "\
api_key: key-1
agent_id: agent-1
backup_mode: scheduled
keepalive_freq_seconds: 120
send_logs: true
backup_paths:
  - /tmp/sc/root
recursive_backup_paths:
  - /home/user/docs
backup_schedule:
  weekly:
    Monday:
      - 09:00
  monthly:
    Last day:
      - 23:30
";

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_text(FULL).unwrap();
        assert_eq!(settings.api_key, "key-1");
        assert_eq!(settings.backup_mode, BackupMode::Scheduled);
        assert_eq!(settings.keepalive_freq_seconds, 120);
        assert!(settings.send_logs);
        assert_eq!(settings.backup_paths, vec![PathBuf::from("/tmp/sc/root")]);
        assert_eq!(
            settings.backup_schedule.weekly[&Weekday::Mon],
            vec![parse_time("09:00").unwrap()]
        );
        assert_eq!(
            settings.backup_schedule.monthly[&MonthlyDay::LastDay],
            vec![parse_time("23:30").unwrap()]
        );
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let text = "api_key: k\nagent_id: a\nfrobnicator: on\n";
        let settings = Settings::from_text(text).unwrap();
        assert_eq!(settings.api_key, "k");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        assert!(matches!(
            Settings::from_text("agent_id: a\n"),
            Err(SettingsError::MissingKey("api_key"))
        ));
        assert!(matches!(
            Settings::from_text("api_key: k\n"),
            Err(SettingsError::MissingKey("agent_id"))
        ));
    }

    #[test]
    fn test_zero_keepalive_rejected() {
        let text = "api_key: k\nagent_id: a\nkeepalive_freq_seconds: 0\n";
        assert!(Settings::from_text(text).is_err());
    }

    #[test]
    fn test_render_round_trip() {
        let settings = Settings::from_text(FULL).unwrap();
        let reparsed = Settings::from_text(&settings.render()).unwrap();
        assert_eq!(settings, reparsed);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.cfg");

        let mut settings = Settings::new("key", "agent");
        settings.backup_paths.push(PathBuf::from("/tmp/data"));
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        // No temp file is left behind.
        assert!(!path.with_extension("cfg.tmp").exists());
    }

    #[test]
    fn test_update_is_atomic_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.cfg");
        Settings::new("key", "agent").save(&path).unwrap();

        let updated = Settings::update(&path, |s| {
            s.recursive_backup_paths.push(PathBuf::from("/media/usb0"));
        })
        .unwrap();
        assert_eq!(updated.recursive_backup_paths.len(), 1);

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded, updated);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Settings::load(&dir.path().join("absent.cfg")).unwrap_err();
        assert!(matches!(err, SettingsError::NotFound(_)));
    }
}
