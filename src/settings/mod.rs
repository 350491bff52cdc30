//! # Settings
//!
//! Declarative agent configuration: the line-oriented `settings.cfg` the
//! orchestrator re-reads every tick, the calendar schedule it contains, and
//! the installer-owned `stable_settings.cfg` that locates the install.

pub mod errors;
pub mod model;
pub mod parse;
pub mod schedule;
pub mod stable;

pub use errors::{SettingsError, SettingsResult};
pub use model::{BackupMode, Settings};
pub use schedule::{BackupSchedule, MonthlyDay};
pub use stable::StableSettings;
