//! Game definitions and savegame file resolution
//!
//! A [`GameEntry`] carries one optional configuration block per platform.
//! Its [`SavegameType`] selects exactly one of them; that block decides
//! where the savegame lives on disk and which files belong to a backup.

mod platform;
pub mod registry;
pub mod template;

pub use platform::*;
pub use registry::{EpicApp, GameManager, GameRegistry, SteamApp};
pub use template::Variables;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// Absolute file path mapped to its path inside the archive
pub type FileSet = BTreeMap<PathBuf, String>;

/// Which platform block of a game is used for backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavegameType {
    Windows,
    Linux,
    Macos,
    SteamWindows,
    SteamLinux,
    SteamMacos,
    EpicWindows,
}

impl SavegameType {
    /// All savegame types
    pub fn all() -> &'static [SavegameType] {
        &[
            SavegameType::Windows,
            SavegameType::Linux,
            SavegameType::Macos,
            SavegameType::SteamWindows,
            SavegameType::SteamLinux,
            SavegameType::SteamMacos,
            SavegameType::EpicWindows,
        ]
    }

    /// Name used in backup paths and file names
    pub fn as_str(&self) -> &'static str {
        match self {
            SavegameType::Windows => "windows",
            SavegameType::Linux => "linux",
            SavegameType::Macos => "macos",
            SavegameType::SteamWindows => "steam_windows",
            SavegameType::SteamLinux => "steam_linux",
            SavegameType::SteamMacos => "steam_macos",
            SavegameType::EpicWindows => "epic_windows",
        }
    }

    /// Savegame type matching the host operating system
    pub fn native() -> Self {
        if cfg!(windows) {
            SavegameType::Windows
        } else if cfg!(target_os = "macos") {
            SavegameType::Macos
        } else {
            SavegameType::Linux
        }
    }
}

impl fmt::Display for SavegameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SavegameType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SavegameType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Config(format!("Unknown savegame type: {}", s)))
    }
}

/// Backup subdirectory, chosen by whether the game is still being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SavegameSubdir {
    Live,
    Finished,
}

impl SavegameSubdir {
    pub fn as_str(&self) -> &'static str {
        match self {
            SavegameSubdir::Live => "live",
            SavegameSubdir::Finished => "finished",
        }
    }
}

impl fmt::Display for SavegameSubdir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SavegameSubdir {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "live" => Ok(SavegameSubdir::Live),
            "finished" => Ok(SavegameSubdir::Finished),
            other => Err(Error::Config(format!("Unknown savegame subdir: {}", other))),
        }
    }
}

/// A trackable game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEntry {
    /// Unique identifier
    pub key: String,
    /// Display name
    pub name: String,
    /// Name used for the backup directory and archive file names
    pub savegame_name: String,
    pub savegame_type: SavegameType,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub is_live: bool,
    /// Variables shared by all platform blocks of this game
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<WindowsGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<UnixGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macos: Option<UnixGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_windows: Option<SteamGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_linux: Option<SteamGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_macos: Option<SteamGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_windows: Option<EpicGame>,
}

fn default_true() -> bool {
    true
}

/// Savegame location after template expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSavegame {
    /// Expanded savegame root
    pub root: PathBuf,
    /// Expanded savegame directory, `/`-separated, relative to `root`
    pub dir: String,
    /// Variables the templates were expanded with
    pub variables: Variables,
}

impl ResolvedSavegame {
    /// Absolute path of the savegame directory
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.dir)
    }
}

impl GameEntry {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        savegame_name: impl Into<String>,
        savegame_type: SavegameType,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            savegame_name: savegame_name.into(),
            savegame_type,
            is_active: true,
            is_live: true,
            variables: Variables::new(),
            windows: None,
            linux: None,
            macos: None,
            steam_windows: None,
            steam_linux: None,
            steam_macos: None,
            epic_windows: None,
        }
    }

    /// Backup subdirectory for the current live state
    pub fn subdir(&self) -> SavegameSubdir {
        if self.is_live {
            SavegameSubdir::Live
        } else {
            SavegameSubdir::Finished
        }
    }

    /// Platform block selected by `savegame_type`
    pub fn platform(&self) -> Option<&dyn SavegamePlatform> {
        match self.savegame_type {
            SavegameType::Windows => self.windows.as_ref().map(|g| g as &dyn SavegamePlatform),
            SavegameType::Linux => self.linux.as_ref().map(|g| g as &dyn SavegamePlatform),
            SavegameType::Macos => self.macos.as_ref().map(|g| g as &dyn SavegamePlatform),
            SavegameType::SteamWindows => {
                self.steam_windows.as_ref().map(|g| g as &dyn SavegamePlatform)
            }
            SavegameType::SteamLinux => {
                self.steam_linux.as_ref().map(|g| g as &dyn SavegamePlatform)
            }
            SavegameType::SteamMacos => {
                self.steam_macos.as_ref().map(|g| g as &dyn SavegamePlatform)
            }
            SavegameType::EpicWindows => {
                self.epic_windows.as_ref().map(|g| g as &dyn SavegamePlatform)
            }
        }
    }

    /// Backup configuration of the selected platform
    pub fn game_data(&self) -> Option<&GameData> {
        self.platform().map(|p| p.game_data())
    }

    /// Steam app id of any Steam block
    pub fn steam_appid(&self) -> Option<u32> {
        [&self.steam_windows, &self.steam_linux, &self.steam_macos]
            .into_iter()
            .flatten()
            .map(|g| g.appid)
            .next()
    }

    /// Epic app name of the Epic block
    pub fn epic_appname(&self) -> Option<&str> {
        self.epic_windows.as_ref().map(|g| g.appname.as_str())
    }

    /// Merge global, platform, game and platform-block variables, in that order
    pub fn variables_with(&self, global: &Variables) -> Variables {
        match self.platform() {
            Some(platform) => template::merge([
                global,
                &platform.platform_variables(),
                &self.variables,
                &platform.game_data().variables,
            ]),
            None => template::merge([global, &self.variables]),
        }
    }

    /// Expand the savegame root and directory templates
    pub fn resolve(&self, global: &Variables) -> Result<ResolvedSavegame> {
        let data = self.game_data().ok_or_else(|| Error::InvalidGame {
            game: self.key.clone(),
            reason: format!("no {} configuration", self.savegame_type),
        })?;

        let variables = self.variables_with(global);
        let root = template::expand(&data.savegame_root, &variables);
        let dir = normalize_dir(&template::expand(&data.savegame_dir, &variables));

        if root.is_empty() || dir.is_empty() {
            return Err(Error::InvalidGame {
                game: self.key.clone(),
                reason: "savegame root or directory is empty".to_string(),
            });
        }

        Ok(ResolvedSavegame {
            root: PathBuf::from(root),
            dir,
            variables,
        })
    }

    /// Whether root and directory both resolve to something non-empty
    pub fn is_valid(&self, global: &Variables) -> bool {
        self.resolve(global).is_ok()
    }

    /// Collect the files that make up this game's backup.
    ///
    /// Keys are absolute paths; values are the archive paths
    /// (`savegame_dir/relative/path`). The walk is sorted so an unchanged
    /// tree always yields the same set.
    pub fn backup_files(&self, global: &Variables) -> Result<FileSet> {
        let resolved = self.resolve(global)?;
        let data = self.game_data().ok_or_else(|| Error::InvalidGame {
            game: self.key.clone(),
            reason: format!("no {} configuration", self.savegame_type),
        })?;

        let savegame_path = resolved.path();
        if !savegame_path.is_dir() {
            return Err(Error::NoSavegameDirectory {
                game: self.key.clone(),
                path: savegame_path,
            });
        }

        let mut files = FileSet::new();
        for entry in WalkDir::new(&savegame_path).sort_by_file_name() {
            let entry = entry?;
            if !is_regular_file(&entry) {
                continue;
            }

            let rel_path = relative_slash_path(entry.path(), &savegame_path);
            if data.match_file(&rel_path) {
                tracing::debug!("[{}] including {}", self.key, rel_path);
                files.insert(
                    entry.path().to_path_buf(),
                    format!("{}/{}", resolved.dir, rel_path),
                );
            }
        }

        Ok(files)
    }

    /// Serialize as pretty JSON, the format of `gameconf.json`
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Symlinks count when they point at a regular file
fn is_regular_file(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
}

fn relative_slash_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn normalize_dir(dir: &str) -> String {
    dir.replace('\\', "/").trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::FileMatcher;
    use std::fs;
    use tempfile::tempdir;

    fn linux_game(root: &str, dir: &str) -> GameEntry {
        let mut game = GameEntry::new("test", "Test Game", "TestGame", SavegameType::Linux);
        game.linux = Some(UnixGame {
            data: GameData::new(root, dir),
            ..Default::default()
        });
        game
    }

    #[test]
    fn test_savegame_type_names() {
        for t in SavegameType::all() {
            assert_eq!(t.as_str().parse::<SavegameType>().unwrap(), *t);
            let json = serde_json::to_string(t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!("dos".parse::<SavegameType>().is_err());
    }

    #[test]
    fn test_platform_dispatch_follows_savegame_type() {
        let mut game = linux_game("/linux", "save");
        game.windows = Some(WindowsGame {
            data: GameData::new("/windows", "save"),
            installdir: None,
        });

        assert_eq!(game.game_data().unwrap().savegame_root, "/linux");
        game.savegame_type = SavegameType::Windows;
        assert_eq!(game.game_data().unwrap().savegame_root, "/windows");
        game.savegame_type = SavegameType::SteamLinux;
        assert!(game.game_data().is_none());
        assert!(matches!(
            game.resolve(&Variables::new()),
            Err(Error::InvalidGame { .. })
        ));
    }

    #[test]
    fn test_variable_precedence() {
        let mut game = GameEntry::new("k", "n", "s", SavegameType::SteamLinux);
        game.variables.insert("SLOT".into(), "game".into());
        game.steam_linux = Some(SteamGame {
            data: GameData::new("${ROOT}", "${STEAM_APPID}/${SLOT}").with_variable("ROOT", "/block"),
            appid: 42,
            installdir: None,
        });

        let mut global = Variables::new();
        global.insert("ROOT".into(), "/global".into());
        global.insert("SLOT".into(), "global".into());
        global.insert("STEAM_APPID".into(), "0".into());

        let resolved = game.resolve(&global).unwrap();
        assert_eq!(resolved.root, PathBuf::from("/block"));
        assert_eq!(resolved.dir, "42/game");
    }

    #[test]
    fn test_empty_resolution_is_invalid() {
        let game = linux_game("${NOTHING_HERE_EITHER}", "");
        assert!(!game.is_valid(&Variables::new()));
        let game = linux_game("/root", "dir/");
        assert_eq!(game.resolve(&Variables::new()).unwrap().dir, "dir");
    }

    #[test]
    fn test_missing_directory() {
        let temp = tempdir().unwrap();
        let game = linux_game(&temp.path().to_string_lossy(), "does-not-exist");
        let err = game.backup_files(&Variables::new()).unwrap_err();
        assert!(matches!(err, Error::NoSavegameDirectory { .. }));
        assert!(err.is_nothing_to_backup());
    }

    #[test]
    fn test_ignore_scenario() {
        let temp = tempdir().unwrap();
        let data_dir = temp.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(data_dir.join("save1.bin"), b"save").unwrap();
        fs::write(data_dir.join("cache.tmp"), b"cache").unwrap();

        let mut game = linux_game(&temp.path().to_string_lossy(), "data");
        game.linux
            .as_mut()
            .unwrap()
            .data
            .ignore_match
            .push(FileMatcher::filename("cache.tmp"));

        let files = game.backup_files(&Variables::new()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[&data_dir.join("save1.bin")], "data/save1.bin");
    }

    #[test]
    fn test_match_all_and_nested_paths() {
        let temp = tempdir().unwrap();
        let save_dir = temp.path().join("saves");
        fs::create_dir_all(save_dir.join("slot1/sub")).unwrap();
        fs::write(save_dir.join("a.sav"), b"a").unwrap();
        fs::write(save_dir.join("slot1/b.sav"), b"b").unwrap();
        fs::write(save_dir.join("slot1/sub/c.cfg"), b"c").unwrap();

        let game = linux_game(&temp.path().to_string_lossy(), "saves");
        let files = game.backup_files(&Variables::new()).unwrap();
        let archive_paths: Vec<&str> = files.values().map(String::as_str).collect();
        assert_eq!(
            archive_paths,
            vec!["saves/a.sav", "saves/slot1/b.sav", "saves/slot1/sub/c.cfg"]
        );

        let mut glob_game = game.clone();
        glob_game.linux.as_mut().unwrap().data.file_match.push(FileMatcher::glob("*.sav"));
        let files = glob_game.backup_files(&Variables::new()).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_backup_files_is_deterministic() {
        let temp = tempdir().unwrap();
        let save_dir = temp.path().join("s");
        for i in 0..20 {
            let dir = save_dir.join(format!("d{}", i % 4));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("f{}.dat", i)), i.to_string()).unwrap();
        }

        let game = linux_game(&temp.path().to_string_lossy(), "s");
        let first = game.backup_files(&Variables::new()).unwrap();
        let second = game.backup_files(&Variables::new()).unwrap();
        assert_eq!(first.len(), 20);
        assert_eq!(first, second);
    }

    #[test]
    fn test_gameconf_json_roundtrip() {
        let mut game = linux_game("${HOME}/.local/share", "Game");
        game.linux.as_mut().unwrap().data.file_match.push(FileMatcher::regex(r"\.sav$"));
        game.steam_windows = Some(SteamGame {
            data: GameData::new("C:/Steam", "userdata"),
            appid: 7,
            installdir: Some("C:/Steam/common/x".into()),
        });

        let bytes = game.to_json_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["savegame_type"], "linux");
        assert!(json.get("windows").is_none());

        let back = GameEntry::from_json_slice(&bytes).unwrap();
        assert_eq!(back, game);
        assert_eq!(back.steam_appid(), Some(7));
    }
}
