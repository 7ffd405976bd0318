//! Settings and default paths

use crate::error::{Error, Result};
use crate::game::Variables;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Key of the archiver used when the configured one is unknown
pub const FALLBACK_ARCHIVER: &str = "zipfile";

/// Settings for sgbackup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory all backups are written to
    pub backup_dir: PathBuf,
    /// Number of live backups kept per game; 0 keeps everything
    pub backup_versions: u32,
    /// Worker threads for batch backups; 0 is treated as 1
    pub backup_threads: usize,
    /// Key of the archiver used for new backups
    pub default_archiver: String,
    /// User defined variables for path templates
    pub variables: Variables,
    /// Directory holding the game definitions
    pub games_dir: PathBuf,
    /// Steam app ids excluded from new app discovery
    pub steam_ignore_apps: BTreeSet<u32>,
    /// Epic app names excluded from new app discovery
    pub epic_ignore_apps: BTreeSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            backup_versions: 0,
            backup_threads: 1,
            default_archiver: FALLBACK_ARCHIVER.to_string(),
            variables: Variables::new(),
            games_dir: config_dir().join("games"),
            steam_ignore_apps: BTreeSet::new(),
            epic_ignore_apps: BTreeSet::new(),
        }
    }
}

impl Settings {
    /// Settings writing backups to `backup_dir`, everything else default
    pub fn with_backup_dir(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            ..Default::default()
        }
    }

    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        config_dir().join("sgbackup.json")
    }

    /// Load settings from disk, falling back to defaults if not found
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring unreadable settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Worker count for batch backups, never below one
    pub fn thread_count(&self) -> usize {
        self.backup_threads.max(1)
    }

    /// Global template variables: built-in directories, then user overrides
    pub fn variables(&self) -> Variables {
        let mut vars = builtin_variables();
        vars.extend(self.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sgbackup")
}

/// Get the default backup directory
pub fn default_backup_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sgbackup")
        .join("backups")
}

fn builtin_variables() -> Variables {
    let mut vars = Variables::new();
    let mut set = |name: &str, dir: Option<PathBuf>| {
        if let Some(dir) = dir {
            vars.insert(name.to_string(), dir.to_string_lossy().into_owned());
        }
    };

    set("HOME", dirs::home_dir());
    set("USER_HOME", dirs::home_dir());
    set("DOCUMENTS", dirs::document_dir());
    set("DATA_DIR", dirs::data_dir());
    set("LOCAL_DATA_DIR", dirs::data_local_dir());
    set("CONFIG_DIR", dirs::config_dir());
    if cfg!(all(unix, not(target_os = "macos"))) {
        set("XDG_DATA_HOME", dirs::data_dir());
        set("XDG_CONFIG_HOME", dirs::config_dir());
    }

    vars
}
