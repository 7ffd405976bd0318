//! Platform specific savegame configuration
//!
//! Every platform block wraps a [`GameData`] plus whatever the platform knows
//! about the installation. All of them expose the same
//! [`SavegamePlatform`] capability so the rest of the crate never has to
//! care which one is selected.

use serde::{Deserialize, Serialize};

use super::template::Variables;
use crate::matcher::{self, FileMatcher};

/// Backup configuration shared by all platforms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameData {
    /// Template for the directory the savegame directory lives in
    pub savegame_root: String,
    /// Template for the savegame directory, relative to the root
    pub savegame_dir: String,
    /// Variables only visible to this platform block
    pub variables: Variables,
    /// Include rules; empty means every file
    pub file_match: Vec<FileMatcher>,
    /// Exclude rules, applied after the include rules
    pub ignore_match: Vec<FileMatcher>,
}

impl GameData {
    pub fn new(savegame_root: impl Into<String>, savegame_dir: impl Into<String>) -> Self {
        Self {
            savegame_root: savegame_root.into(),
            savegame_dir: savegame_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_file_match(mut self, matcher: FileMatcher) -> Self {
        self.file_match.push(matcher);
        self
    }

    pub fn with_ignore_match(mut self, matcher: FileMatcher) -> Self {
        self.ignore_match.push(matcher);
        self
    }

    /// Whether a path relative to the savegame directory belongs to the backup
    pub fn match_file(&self, rel_path: &str) -> bool {
        matcher::is_included(rel_path, &self.file_match, &self.ignore_match)
    }
}

/// Capability shared by every platform block
pub trait SavegamePlatform {
    fn game_data(&self) -> &GameData;

    fn game_data_mut(&mut self) -> &mut GameData;

    /// Variables derived from what the platform knows about the install
    fn platform_variables(&self) -> Variables;
}

fn installdir_variable(vars: &mut Variables, installdir: Option<&str>) {
    if let Some(dir) = installdir.filter(|d| !d.is_empty()) {
        vars.insert("INSTALLDIR".to_string(), dir.to_string());
    }
}

/// Natively installed Windows game
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsGame {
    #[serde(flatten)]
    pub data: GameData,
    pub installdir: Option<String>,
}

impl SavegamePlatform for WindowsGame {
    fn game_data(&self) -> &GameData {
        &self.data
    }

    fn game_data_mut(&mut self) -> &mut GameData {
        &mut self.data
    }

    fn platform_variables(&self) -> Variables {
        let mut vars = Variables::new();
        installdir_variable(&mut vars, self.installdir.as_deref());
        vars
    }
}

/// Natively installed Linux or macOS game
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnixGame {
    #[serde(flatten)]
    pub data: GameData,
    /// Executable used to launch the game
    pub binary: Option<String>,
    /// Working directory of the game, exported as `INSTALLDIR`
    pub workdir: Option<String>,
}

impl SavegamePlatform for UnixGame {
    fn game_data(&self) -> &GameData {
        &self.data
    }

    fn game_data_mut(&mut self) -> &mut GameData {
        &mut self.data
    }

    fn platform_variables(&self) -> Variables {
        let mut vars = Variables::new();
        installdir_variable(&mut vars, self.workdir.as_deref());
        vars
    }
}

/// Game installed through Steam
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteamGame {
    #[serde(flatten)]
    pub data: GameData,
    pub appid: u32,
    pub installdir: Option<String>,
}

impl SavegamePlatform for SteamGame {
    fn game_data(&self) -> &GameData {
        &self.data
    }

    fn game_data_mut(&mut self) -> &mut GameData {
        &mut self.data
    }

    fn platform_variables(&self) -> Variables {
        let mut vars = Variables::new();
        vars.insert("STEAM_APPID".to_string(), self.appid.to_string());
        installdir_variable(&mut vars, self.installdir.as_deref());
        vars
    }
}

/// Game installed through the Epic Games launcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpicGame {
    #[serde(flatten)]
    pub data: GameData,
    pub appname: String,
    pub installdir: Option<String>,
}

impl SavegamePlatform for EpicGame {
    fn game_data(&self) -> &GameData {
        &self.data
    }

    fn game_data_mut(&mut self) -> &mut GameData {
        &mut self.data
    }

    fn platform_variables(&self) -> Variables {
        let mut vars = Variables::new();
        vars.insert("EPIC_APPNAME".to_string(), self.appname.clone());
        installdir_variable(&mut vars, self.installdir.as_deref());
        vars
    }
}
