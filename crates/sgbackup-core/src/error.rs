//! Error types for sgbackup-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sgbackup operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read/write ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid matcher kind: {0:?} (expected glob, regex or filename)")]
    InvalidMatcherKind(String),

    #[error("Savegame directory for {game} does not exist: {path}")]
    NoSavegameDirectory { game: String, path: PathBuf },

    #[error("No files to backup for {game}")]
    NoFilesToBackup { game: String },

    #[error("Not a savegame archive: {0}")]
    NotAnArchive(PathBuf),

    #[error("A backup is already in progress")]
    BackupAlreadyInProgress,

    #[error("Failed to write archive {path}: {message}")]
    ArchiveWrite { path: PathBuf, message: String },

    #[error("Failed to read archive {path}: {message}")]
    ArchiveRead { path: PathBuf, message: String },

    #[error("Game {game} is not configured for backups: {reason}")]
    InvalidGame { game: String, reason: String },

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error only means there was nothing to back up.
    ///
    /// These are reported as skipped games rather than failures.
    pub fn is_nothing_to_backup(&self) -> bool {
        matches!(
            self,
            Error::NoSavegameDirectory { .. } | Error::NoFilesToBackup { .. }
        )
    }
}

/// Result type alias for sgbackup operations
pub type Result<T> = std::result::Result<T, Error>;
