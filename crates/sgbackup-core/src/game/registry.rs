//! Game registry: where game definitions come from
//!
//! The backup engine only needs [`GameRegistry`]. [`GameManager`] is the
//! default implementation, keeping one `<key>.gameconf` JSON file per game in
//! a directory.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::GameEntry;

/// File extension of stored game definitions
pub const GAMECONF_EXTENSION: &str = "gameconf";

/// Source of game definitions
pub trait GameRegistry {
    fn get_game(&self, key: &str) -> Option<&GameEntry>;

    /// All games, ordered by key
    fn list_games(&self) -> Vec<&GameEntry>;

    fn add(&mut self, game: GameEntry) -> Result<()>;

    fn remove(&mut self, key: &str) -> Result<Option<GameEntry>>;
}

/// An app installed through Steam
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteamApp {
    pub appid: u32,
    pub name: String,
    pub installdir: PathBuf,
}

/// An app installed through the Epic Games launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpicApp {
    pub appname: String,
    pub name: String,
    pub installdir: PathBuf,
}

/// Directory backed game registry
#[derive(Debug, Default)]
pub struct GameManager {
    games_dir: Option<PathBuf>,
    games: BTreeMap<String, GameEntry>,
    steam_index: HashMap<u32, String>,
    epic_index: HashMap<String, String>,
}

impl GameManager {
    /// Registry that lives only in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load every `*.gameconf` file from `games_dir`.
    ///
    /// Unreadable files are logged and skipped.
    pub fn load(games_dir: impl Into<PathBuf>) -> Result<Self> {
        let games_dir = games_dir.into();
        let mut manager = Self {
            games_dir: Some(games_dir.clone()),
            ..Default::default()
        };

        if !games_dir.exists() {
            return Ok(manager);
        }

        for entry in std::fs::read_dir(&games_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == GAMECONF_EXTENSION).unwrap_or(false) {
                match std::fs::read(&path).map_err(Error::from).and_then(|b| GameEntry::from_json_slice(&b)) {
                    Ok(game) => {
                        tracing::debug!("Loaded game {} from {}", game.key, path.display());
                        manager.insert(game);
                    }
                    Err(e) => tracing::warn!("Skipping game file {}: {}", path.display(), e),
                }
            }
        }

        Ok(manager)
    }

    pub fn games_dir(&self) -> Option<&Path> {
        self.games_dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Games that take part in backups
    pub fn active_games(&self) -> Vec<&GameEntry> {
        self.games.values().filter(|g| g.is_active).collect()
    }

    pub fn game_by_steam_appid(&self, appid: u32) -> Option<&GameEntry> {
        self.steam_index.get(&appid).and_then(|key| self.games.get(key))
    }

    pub fn game_by_epic_appname(&self, appname: &str) -> Option<&GameEntry> {
        self.epic_index.get(appname).and_then(|key| self.games.get(key))
    }

    /// Write a game definition to the games directory
    pub fn save(&self, key: &str) -> Result<()> {
        let game = self
            .games
            .get(key)
            .ok_or_else(|| Error::GameNotFound(key.to_string()))?;
        if let Some(path) = self.game_file(key) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, game.to_json_bytes()?)?;
        }
        Ok(())
    }

    /// Change a game's key, moving its file and refreshing the indexes
    pub fn rename(&mut self, old_key: &str, new_key: &str) -> Result<()> {
        if old_key == new_key {
            return Ok(());
        }
        if self.games.contains_key(new_key) {
            return Err(Error::Config(format!("Game key already in use: {}", new_key)));
        }

        let mut game = self
            .remove_from_index(old_key)
            .ok_or_else(|| Error::GameNotFound(old_key.to_string()))?;
        game.key = new_key.to_string();
        self.insert(game);

        if let Some(old_path) = self.game_file(old_key) {
            if old_path.exists() {
                std::fs::remove_file(&old_path)?;
            }
            self.save(new_key)?;
        }

        tracing::info!("Renamed game {} to {}", old_key, new_key);
        Ok(())
    }

    /// Installed Steam apps that are neither tracked nor ignored
    pub fn new_steam_apps(&self, installed: &[SteamApp], ignored: &BTreeSet<u32>) -> Vec<SteamApp> {
        installed
            .iter()
            .filter(|app| !self.steam_index.contains_key(&app.appid) && !ignored.contains(&app.appid))
            .cloned()
            .collect()
    }

    /// Installed Epic apps that are neither tracked nor ignored
    pub fn new_epic_apps(&self, installed: &[EpicApp], ignored: &BTreeSet<String>) -> Vec<EpicApp> {
        installed
            .iter()
            .filter(|app| {
                !self.epic_index.contains_key(&app.appname) && !ignored.contains(&app.appname)
            })
            .cloned()
            .collect()
    }

    fn game_file(&self, key: &str) -> Option<PathBuf> {
        self.games_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", key, GAMECONF_EXTENSION)))
    }

    fn insert(&mut self, game: GameEntry) -> Option<GameEntry> {
        let replaced = self.remove_from_index(&game.key);
        if let Some(appid) = game.steam_appid() {
            self.steam_index.insert(appid, game.key.clone());
        }
        if let Some(appname) = game.epic_appname() {
            self.epic_index.insert(appname.to_string(), game.key.clone());
        }
        self.games.insert(game.key.clone(), game);
        replaced
    }

    fn remove_from_index(&mut self, key: &str) -> Option<GameEntry> {
        let game = self.games.remove(key)?;
        self.steam_index.retain(|_, k| k != key);
        self.epic_index.retain(|_, k| k != key);
        Some(game)
    }
}

impl GameRegistry for GameManager {
    fn get_game(&self, key: &str) -> Option<&GameEntry> {
        self.games.get(key)
    }

    fn list_games(&self) -> Vec<&GameEntry> {
        self.games.values().collect()
    }

    fn add(&mut self, game: GameEntry) -> Result<()> {
        let key = game.key.clone();
        self.insert(game);
        self.save(&key)
    }

    fn remove(&mut self, key: &str) -> Result<Option<GameEntry>> {
        let removed = self.remove_from_index(key);
        if removed.is_some() {
            if let Some(path) = self.game_file(key) {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(removed)
    }
}
