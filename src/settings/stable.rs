//! Installer-owned stable settings
//!
//! `stable_settings.cfg` is a small JSON file the installer writes under the
//! per-OS user-config directory. The agent reads it to locate its install
//! directory; it never writes it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{SettingsError, SettingsResult};

/// Contents of `<user-config>/Stormcloud/stable_settings.cfg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableSettings {
    pub install_path: String,
    pub version: String,
}

impl StableSettings {
    /// Default on-disk location for this OS.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Stormcloud").join("stable_settings.cfg"))
    }

    pub fn load(path: &Path) -> SettingsResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            SettingsError::StableSettings(format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| SettingsError::StableSettings(format!("{}: {}", path.display(), e)))
    }

    pub fn install_dir(&self) -> PathBuf {
        PathBuf::from(&self.install_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_stable_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stable_settings.cfg");
        fs::write(&path, r#"{"install_path": "/opt/stormcloud", "version": "1.2.0"}"#).unwrap();

        let stable = StableSettings::load(&path).unwrap();
        assert_eq!(stable.install_dir(), PathBuf::from("/opt/stormcloud"));
        assert_eq!(stable.version, "1.2.0");
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stable_settings.cfg");
        fs::write(&path, "install_path=/opt").unwrap();
        assert!(StableSettings::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(StableSettings::load(&dir.path().join("nope.cfg")).is_err());
    }
}
