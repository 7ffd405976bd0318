//! # sgbackup-core
//!
//! Core library for backing up and restoring game savegames.
//!
//! This crate provides:
//! - Game configurations with per-platform savegame locations and `${VAR}` templates
//! - File selection through glob, regex and filename matchers
//! - ZIP and tar (plain, gzip, bzip2, xz) backup archives
//! - Concurrent batch backups with progress events and backup retention
//! - Restores that detect the archive format automatically
//!
//! ## Modules
//!
//! - [`archiver`] - Archive formats and backup file naming
//! - [`config`] - Application settings and built-in variables
//! - [`error`] - Error types and Result alias
//! - [`events`] - Backup events and the event bus
//! - [`game`] - Game configurations, file resolution and the game registry
//! - [`manager`] - Backup orchestration
//! - [`matcher`] - File matchers
//!
//! ## Example
//!
//! ```no_run
//! use sgbackup_core::{ArchiverManager, BackupEvent, GameManager, Settings};
//!
//! let settings = Settings::load();
//! let games = GameManager::load(&settings.games_dir).expect("Failed to load games");
//! let manager = ArchiverManager::new(settings);
//!
//! manager.events().subscribe(|event| {
//!     if let BackupEvent::Progress { fraction } = event {
//!         println!("{:.0}%", fraction * 100.0);
//!     }
//! });
//!
//! let active: Vec<_> = games.active_games().into_iter().cloned().collect();
//! let report = manager.backup_many(&active).expect("Backup already running");
//! println!("{} games backed up", report.succeeded());
//! ```

pub mod archiver;
pub mod config;
pub mod error;
pub mod events;
pub mod game;
pub mod manager;
pub mod matcher;

// Error types
pub use error::{Error, Result};

// Configuration
pub use config::Settings;

// Games
pub use game::{
    EpicGame, FileSet, GameData, GameEntry, GameManager, GameRegistry, SavegameSubdir,
    SavegameType, SteamGame, UnixGame, Variables, WindowsGame,
};

// Matching
pub use matcher::{FileMatcher, MatcherKind};

// Archives
pub use archiver::{
    ArchiveProgress, Archiver, BackupFileName, RestoreResult, TarArchiver, TarCompression,
    ZipArchiver,
};

// Orchestration
pub use events::{BackupEvent, BackupOutcome, EventBus};
pub use manager::{ArchiverManager, BackupInfo, BatchReport};
