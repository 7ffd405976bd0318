//! Archive formats for savegame backups
//!
//! Every format implements [`Archiver`]. An archive holds one
//! `gameconf.json` entry with the serialized [`GameEntry`] followed by the
//! savegame files at their `/`-separated paths relative to the savegame root.
//!
//! Backups are stored as
//! `{backup_dir}/{savegame_name}/{savegame_type}/{live|finished}/` with file
//! names of the form
//! `{savegame_name}.{YYYYMMDD-HHMMSS}.{savegame_type}.{subdir}.sgbackup.{ext}`,
//! so sorting names within one directory sorts backups by age.

pub mod tar;
pub mod zip;

pub use self::tar::{TarArchiver, TarCompression};
pub use self::zip::ZipArchiver;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::game::{FileSet, GameEntry, SavegameSubdir, SavegameType};
use chrono::NaiveDateTime;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the metadata entry inside every archive
pub const METADATA_ENTRY: &str = "gameconf.json";

/// Marker between the descriptive part of a backup name and its extension
const NAME_MARKER: &str = ".sgbackup.";

/// Timestamp layout used in backup file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Directory holding a game's backups for one subdir
pub fn backup_directory(
    backup_dir: &Path,
    savegame_name: &str,
    savegame_type: SavegameType,
    subdir: SavegameSubdir,
) -> PathBuf {
    backup_dir
        .join(savegame_name)
        .join(savegame_type.as_str())
        .join(subdir.as_str())
}

/// Parsed form of a backup file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFileName {
    pub savegame_name: String,
    pub timestamp: NaiveDateTime,
    pub savegame_type: SavegameType,
    pub subdir: SavegameSubdir,
    /// Extension without leading dot, e.g. `tar.gz`
    pub extension: String,
}

impl BackupFileName {
    /// Name for a new backup of `game`
    pub fn new(game: &GameEntry, timestamp: NaiveDateTime, extension: &str) -> Self {
        Self {
            savegame_name: game.savegame_name.clone(),
            timestamp,
            savegame_type: game.savegame_type,
            subdir: game.subdir(),
            extension: extension.to_string(),
        }
    }

    /// Parse a file name; `None` if it is not a backup name.
    ///
    /// The savegame name is split off from the right so it may contain dots.
    pub fn parse(filename: &str) -> Option<Self> {
        let marker = filename.rfind(NAME_MARKER)?;
        let (head, extension) = (&filename[..marker], &filename[marker + NAME_MARKER.len()..]);
        if extension.is_empty() {
            return None;
        }

        let mut parts = head.rsplitn(4, '.');
        let subdir = parts.next()?.parse().ok()?;
        let savegame_type = parts.next()?.parse().ok()?;
        let timestamp = NaiveDateTime::parse_from_str(parts.next()?, TIMESTAMP_FORMAT).ok()?;
        let savegame_name = parts.next().filter(|n| !n.is_empty())?;

        Some(Self {
            savegame_name: savegame_name.to_string(),
            timestamp,
            savegame_type,
            subdir,
            extension: extension.to_string(),
        })
    }

    /// Full path of this backup below `backup_dir`
    pub fn path_in(&self, backup_dir: &Path) -> PathBuf {
        backup_directory(backup_dir, &self.savegame_name, self.savegame_type, self.subdir)
            .join(self.to_string())
    }
}

impl fmt::Display for BackupFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}{}{}",
            self.savegame_name,
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.savegame_type,
            self.subdir,
            NAME_MARKER,
            self.extension
        )
    }
}

/// Progress of writing one archive
#[derive(Debug, Clone)]
pub struct ArchiveProgress {
    /// Fraction done, within `[0.0, 1.0]`
    pub fraction: f64,
    pub entries_written: usize,
    pub total_entries: usize,
    /// Entry that was just written
    pub current_entry: String,
}

/// Counts written entries for progress reporting.
///
/// The metadata entry counts, so the total is the file count plus one.
#[derive(Debug)]
pub struct ProgressTracker {
    written: usize,
    total: usize,
}

impl ProgressTracker {
    pub fn new(file_count: usize) -> Self {
        Self {
            written: 0,
            total: file_count + 1,
        }
    }

    /// Record one written entry
    pub fn advance(&mut self, entry: &str) -> ArchiveProgress {
        self.written += 1;
        ArchiveProgress {
            fraction: (self.written as f64 / self.total as f64).clamp(0.0, 1.0),
            entries_written: self.written,
            total_entries: self.total,
            current_entry: entry.to_string(),
        }
    }
}

/// Outcome of extracting an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Files written to disk
    pub extracted: usize,
    /// Entries that could not be restored
    pub failed: usize,
}

/// Outcome of a successful restore
#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// Game configuration stored in the archive
    pub game: GameEntry,
    /// Savegame root the files were restored into
    pub root: PathBuf,
    pub files_restored: usize,
}

/// An archive container format
pub trait Archiver: Send + Sync {
    /// Unique identifier, stored in settings
    fn key(&self) -> &str;

    /// Human readable description
    fn description(&self) -> &str;

    /// File extension without leading dot
    fn extension(&self) -> &str;

    /// Whether `path` is a readable archive of this format with a metadata entry.
    ///
    /// Never fails; malformed input yields `false`.
    fn is_archive(&self, path: &Path) -> bool;

    /// Write `metadata` as the first entry, then every file in `files`
    fn write_archive(
        &self,
        dest: &Path,
        metadata: &[u8],
        files: &FileSet,
        progress: &dyn Fn(ArchiveProgress),
    ) -> Result<()>;

    /// Read the game configuration stored in an archive
    fn read_game(&self, path: &Path) -> Result<GameEntry>;

    /// Extract every savegame entry below `root`, continuing past failed entries
    fn extract(&self, path: &Path, root: &Path) -> Result<ExtractReport>;

    /// Back up a game into a new archive and return its path.
    fn backup(
        &self,
        game: &GameEntry,
        settings: &Settings,
        progress: &dyn Fn(ArchiveProgress),
    ) -> Result<PathBuf> {
        self.backup_at(game, settings, chrono::Local::now().naive_local(), progress)
    }

    /// Back up a game into an archive named after `timestamp`.
    ///
    /// The archive is written to a hidden `.part` file next to its
    /// destination and renamed into place once complete. A failed write
    /// removes only that file, never an existing backup of the same name.
    fn backup_at(
        &self,
        game: &GameEntry,
        settings: &Settings,
        timestamp: NaiveDateTime,
        progress: &dyn Fn(ArchiveProgress),
    ) -> Result<PathBuf> {
        let files = game.backup_files(&settings.variables())?;
        if files.is_empty() {
            return Err(Error::NoFilesToBackup {
                game: game.key.clone(),
            });
        }

        let name = BackupFileName::new(game, timestamp, self.extension());
        let dest = name.path_in(&settings.backup_dir);
        let metadata = game.to_json_bytes()?;
        let write_error = |message: String| Error::ArchiveWrite {
            path: dest.clone(),
            message,
        };

        tracing::info!(
            "[{}] writing {} files to {}",
            game.key,
            files.len(),
            dest.display()
        );

        let parent = dest
            .parent()
            .ok_or_else(|| write_error("backup path has no parent directory".to_string()))?;
        std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;

        // Dropping the temp file on any error path deletes it
        let partial = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|e| write_error(e.to_string()))?;

        if let Err(e) = self.write_archive(partial.path(), &metadata, &files, progress) {
            tracing::warn!("[{}] discarding partial archive {}", game.key, partial.path().display());
            return Err(write_error(e.to_string()));
        }

        partial
            .persist(&dest)
            .map_err(|e| write_error(e.error.to_string()))?;

        Ok(dest)
    }

    /// Restore an archive into the savegame root of the game stored in it
    fn restore(&self, path: &Path, settings: &Settings) -> Result<RestoreResult> {
        if !self.is_archive(path) {
            return Err(Error::NotAnArchive(path.to_path_buf()));
        }

        let game = self.read_game(path)?;
        let resolved = game.resolve(&settings.variables())?;
        std::fs::create_dir_all(&resolved.root)?;

        let report = self.extract(path, &resolved.root)?;
        if report.failed > 0 {
            tracing::error!(
                "[{}] restore of {} incomplete: {} restored, {} failed",
                game.key,
                path.display(),
                report.extracted,
                report.failed
            );
            return Err(Error::ArchiveRead {
                path: path.to_path_buf(),
                message: format!(
                    "{} entries could not be restored ({} restored)",
                    report.failed, report.extracted
                ),
            });
        }

        tracing::info!(
            "[{}] restored {} files into {}",
            game.key,
            report.extracted,
            resolved.root.display()
        );

        Ok(RestoreResult {
            game,
            root: resolved.root,
            files_restored: report.extracted,
        })
    }
}

/// Archivers registered by default, the zip archiver first
pub fn builtin_archivers() -> Vec<std::sync::Arc<dyn Archiver>> {
    vec![
        std::sync::Arc::new(ZipArchiver::new()),
        std::sync::Arc::new(TarArchiver::new(TarCompression::None)),
        std::sync::Arc::new(TarArchiver::new(TarCompression::Gzip)),
        std::sync::Arc::new(TarArchiver::new(TarCompression::Bzip2)),
        std::sync::Arc::new(TarArchiver::new(TarCompression::Xz)),
    ]
}
