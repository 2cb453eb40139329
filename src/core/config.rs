//! Store configuration, loaded from `<home>/config.toml`.
//!
//! `<home>` is `$PROJSTATE_HOME`, else `$HOME/.projstate` (`%USERPROFILE%` on
//! Windows). A missing config file means all defaults; relative paths in the file are
//! resolved against `<home>`.

use crate::core::error::StateError;
use crate::core::pipeline::HealMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "PROJSTATE_HOME";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Whether a phase gate that evaluates to "not done" may clear a completed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhasePolicy {
    /// Completed phases stay completed.
    #[default]
    Monotonic,
    /// The flag always follows the latest evaluation.
    Reevaluate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub line_tolerance: usize,
    pub changed_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            line_tolerance: 3,
            changed_ratio: 0.3,
        }
    }
}

/// Raw file shape; every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    state_root: Option<PathBuf>,
    secondary_db: Option<PathBuf>,
    registry_file: Option<PathBuf>,
    events_log: Option<PathBuf>,
    disable_events_log: bool,
    scope_export_dir: Option<PathBuf>,
    heal: HealMode,
    phase_policy: PhasePolicy,
    detector: DetectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreConfig {
    pub home: PathBuf,
    pub state_root: PathBuf,
    pub secondary_db: PathBuf,
    pub registry_file: PathBuf,
    pub events_log: Option<PathBuf>,
    pub scope_export_dir: Option<PathBuf>,
    pub heal: HealMode,
    pub phase_policy: PhasePolicy,
    pub detector: DetectorConfig,
}

impl StoreConfig {
    /// Defaults rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            state_root: home.join("state"),
            secondary_db: home.join("settings.db"),
            registry_file: home.join("projects").join("projects.json"),
            events_log: Some(home.join("state.events.jsonl")),
            scope_export_dir: Some(home.join("scopes")),
            heal: HealMode::default(),
            phase_policy: PhasePolicy::default(),
            detector: DetectorConfig::default(),
            home,
        }
    }

    /// Read `<home>/config.toml` if present, otherwise defaults.
    pub fn load(home: &Path) -> Result<Self, StateError> {
        let path = home.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::with_home(home));
        }
        let content = fs::read_to_string(&path)?;
        Self::from_toml(home, &content)
    }

    pub fn from_toml(home: &Path, content: &str) -> Result<Self, StateError> {
        let file: ConfigFile = toml::from_str(content)?;
        if !(0.0..=1.0).contains(&file.detector.changed_ratio) {
            return Err(StateError::ValidationError(format!(
                "detector.changed_ratio must be within 0..=1, got {}",
                file.detector.changed_ratio
            )));
        }
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { home.join(p) };
        let defaults = Self::with_home(home);
        Ok(Self {
            state_root: file.state_root.map(resolve).unwrap_or(defaults.state_root),
            secondary_db: file.secondary_db.map(resolve).unwrap_or(defaults.secondary_db),
            registry_file: file.registry_file.map(resolve).unwrap_or(defaults.registry_file),
            events_log: if file.disable_events_log {
                None
            } else {
                file.events_log.map(resolve).or(defaults.events_log)
            },
            scope_export_dir: file.scope_export_dir.map(resolve).or(defaults.scope_export_dir),
            heal: file.heal,
            phase_policy: file.phase_policy,
            detector: file.detector,
            home: home.to_path_buf(),
        })
    }
}

/// `$PROJSTATE_HOME`, else `<user home>/.projstate`.
pub fn resolve_home() -> Result<PathBuf, StateError> {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|h| PathBuf::from(h).join(".projstate"))
        .ok_or_else(|| {
            StateError::ValidationError(format!(
                "cannot locate a home directory; set {} explicitly",
                HOME_ENV
            ))
        })
}
