//! Backup orchestration
//!
//! [`ArchiverManager`] owns the registered archivers and drives single and
//! batch backups. Batches run on a fixed pool of scoped worker threads that
//! pull games from a shared queue; a failing game never stops its siblings.
//! After every successful backup of a live game the oldest live backups
//! beyond `backup_versions` are deleted.

use crate::archiver::{
    backup_directory, builtin_archivers, ArchiveProgress, Archiver, BackupFileName, RestoreResult,
};
use crate::config::{Settings, FALLBACK_ARCHIVER};
use crate::error::{Error, Result};
use crate::events::{BackupEvent, BackupOutcome, EventBus};
use crate::game::{GameEntry, SavegameSubdir};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// A backup file found on disk
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub path: PathBuf,
    /// Parsed file name
    pub name: BackupFileName,
    /// Key of the archiver that recognized the file
    pub archiver_key: String,
    pub size_bytes: u64,
}

impl BackupInfo {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Per-game results of a batch backup, in input order
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, BackupOutcome)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, BackupOutcome::Success(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, BackupOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, BackupOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&BackupOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Reservation of the top-level backup slot, released on drop
#[derive(Debug)]
pub struct BackupRun<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BackupRun<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Games waiting for a worker
struct WorkQueue<'a> {
    games: &'a [GameEntry],
    next: AtomicUsize,
}

impl<'a> WorkQueue<'a> {
    fn new(games: &'a [GameEntry]) -> Self {
        Self {
            games,
            next: AtomicUsize::new(0),
        }
    }

    /// Take the next game, or `None` once the queue is drained
    fn pop(&self) -> Option<(usize, &'a GameEntry)> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.games.get(index).map(|game| (index, game))
    }
}

/// Per-game fractions of a running batch
struct BatchProgress {
    fractions: Mutex<Vec<f64>>,
}

impl BatchProgress {
    fn new(len: usize) -> Self {
        Self {
            fractions: Mutex::new(vec![0.0; len]),
        }
    }

    /// Raise one game's fraction and emit the batch mean.
    ///
    /// Every finished game is raised to 1.0, skipped and failed ones included,
    /// so a failure drops its partial progress and the mean still ends at 1.0.
    /// Emitting under the lock keeps the emitted means non-decreasing.
    fn update(&self, index: usize, fraction: f64, events: &EventBus) {
        let mut fractions = self.fractions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = fractions.get_mut(index) {
            *slot = slot.max(fraction.clamp(0.0, 1.0));
        }
        let mean = fractions.iter().sum::<f64>() / fractions.len().max(1) as f64;
        events.emit(BackupEvent::Progress {
            fraction: mean.clamp(0.0, 1.0),
        });
    }
}

/// Orchestrates backups, retention and restores
pub struct ArchiverManager {
    settings: Settings,
    archivers: Vec<Arc<dyn Archiver>>,
    events: EventBus,
    backup_in_progress: AtomicBool,
}

impl ArchiverManager {
    /// Manager with the built-in archivers registered
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            archivers: builtin_archivers(),
            events: EventBus::new(),
            backup_in_progress: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Event bus all backup events are emitted on
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register an archiver, replacing any with the same key
    pub fn register(&mut self, archiver: Arc<dyn Archiver>) {
        match self.archivers.iter().position(|a| a.key() == archiver.key()) {
            Some(index) => self.archivers[index] = archiver,
            None => self.archivers.push(archiver),
        }
    }

    pub fn archivers(&self) -> &[Arc<dyn Archiver>] {
        &self.archivers
    }

    pub fn archiver(&self, key: &str) -> Option<&Arc<dyn Archiver>> {
        self.archivers.iter().find(|a| a.key() == key)
    }

    /// The configured archiver, or the zip archiver if the key is unknown
    pub fn default_archiver(&self) -> Result<Arc<dyn Archiver>> {
        if let Some(archiver) = self.archiver(&self.settings.default_archiver) {
            return Ok(Arc::clone(archiver));
        }
        tracing::debug!(
            "Unknown archiver {:?}, falling back to {}",
            self.settings.default_archiver,
            FALLBACK_ARCHIVER
        );
        self.archiver(FALLBACK_ARCHIVER)
            .or_else(|| self.archivers.first())
            .map(Arc::clone)
            .ok_or_else(|| Error::Config("no archivers registered".to_string()))
    }

    pub fn is_backup_in_progress(&self) -> bool {
        self.backup_in_progress.load(Ordering::Acquire)
    }

    /// Reserve the top-level backup slot.
    ///
    /// While the returned guard lives every other backup request fails with
    /// [`Error::BackupAlreadyInProgress`].
    pub fn begin_run(&self) -> Result<BackupRun<'_>> {
        self.backup_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::BackupAlreadyInProgress)?;
        Ok(BackupRun {
            flag: &self.backup_in_progress,
        })
    }

    /// Back up one game with the default archiver
    pub fn backup_one(&self, game: &GameEntry) -> Result<PathBuf> {
        let _run = self.begin_run()?;
        let result = self.backup_game(game, None);
        self.events.emit(BackupEvent::Finished);
        result
    }

    /// Back up many games concurrently and block until all are done.
    ///
    /// Per-game failures are logged and reported in the [`BatchReport`];
    /// only a concurrent run makes the whole call fail.
    pub fn backup_many(&self, games: &[GameEntry]) -> Result<BatchReport> {
        let _run = self.begin_run()?;

        let workers = self.settings.thread_count().min(games.len()).max(1);
        tracing::info!("Backing up {} games with {} workers", games.len(), workers);

        let queue = WorkQueue::new(games);
        let progress = BatchProgress::new(games.len());
        let outcomes: Mutex<Vec<Option<BackupOutcome>>> = Mutex::new(vec![None; games.len()]);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some((index, game)) = queue.pop() {
                        let outcome = self.run_batch_game(game, index, &progress);
                        outcomes.lock().unwrap_or_else(PoisonError::into_inner)[index] =
                            Some(outcome);
                    }
                });
            }
        });

        let outcomes = outcomes.into_inner().unwrap_or_else(PoisonError::into_inner);
        let report = BatchReport {
            outcomes: games
                .iter()
                .zip(outcomes)
                .map(|(game, outcome)| {
                    let outcome = outcome
                        .unwrap_or_else(|| BackupOutcome::Failed("not processed".to_string()));
                    (game.key.clone(), outcome)
                })
                .collect(),
        };

        tracing::info!(
            "Batch finished: {} succeeded, {} skipped, {} failed",
            report.succeeded(),
            report.skipped(),
            report.failed()
        );
        self.events.emit(BackupEvent::Finished);
        Ok(report)
    }

    /// One batch game, isolated from panics so siblings keep running
    fn run_batch_game(&self, game: &GameEntry, index: usize, progress: &BatchProgress) -> BackupOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.backup_game(game, Some((progress, index)))
        }));

        match result {
            Ok(Ok(path)) => BackupOutcome::Success(path),
            Ok(Err(e)) if e.is_nothing_to_backup() => BackupOutcome::Skipped(e.to_string()),
            Ok(Err(e)) => BackupOutcome::Failed(e.to_string()),
            Err(_) => {
                tracing::error!("[{}] backup panicked", game.key);
                let outcome = BackupOutcome::Failed("backup panicked".to_string());
                // The panic may have come from a subscriber, which can panic again here
                let notified = panic::catch_unwind(AssertUnwindSafe(|| {
                    progress.update(index, 1.0, &self.events);
                    self.events.emit(BackupEvent::GameFinished {
                        key: game.key.clone(),
                        savegame_name: game.savegame_name.clone(),
                        outcome: outcome.clone(),
                    });
                }));
                if notified.is_err() {
                    tracing::error!("[{}] event subscriber panicked while reporting the failure", game.key);
                }
                outcome
            }
        }
    }

    fn backup_game(
        &self,
        game: &GameEntry,
        batch: Option<(&BatchProgress, usize)>,
    ) -> Result<PathBuf> {
        let result = self.default_archiver().and_then(|archiver| {
            tracing::info!("[{}] starting backup ({})", game.key, archiver.key());
            archiver.backup(game, &self.settings, &|p| self.report_progress(game, p, batch))
        });

        let outcome = match &result {
            Ok(path) => {
                tracing::info!("[{}] backup written to {}", game.key, path.display());
                if game.is_live && self.settings.backup_versions > 0 {
                    self.remove_old_backups(game);
                }
                BackupOutcome::Success(path.clone())
            }
            Err(e) if e.is_nothing_to_backup() => {
                tracing::warn!("[{}] nothing to back up: {}", game.key, e);
                BackupOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                tracing::error!("[{}] backup failed: {}", game.key, e);
                BackupOutcome::Failed(e.to_string())
            }
        };

        // A finished game counts as complete for the batch mean
        if let Some((progress, index)) = batch {
            progress.update(index, 1.0, &self.events);
        }

        self.events.emit(BackupEvent::GameFinished {
            key: game.key.clone(),
            savegame_name: game.savegame_name.clone(),
            outcome,
        });

        result
    }

    fn report_progress(
        &self,
        game: &GameEntry,
        progress: ArchiveProgress,
        batch: Option<(&BatchProgress, usize)>,
    ) {
        let fraction = progress.fraction.clamp(0.0, 1.0);
        self.events.emit(BackupEvent::GameProgress {
            key: game.key.clone(),
            savegame_name: game.savegame_name.clone(),
            fraction,
            message: progress.current_entry,
        });

        match batch {
            Some((batch, index)) => batch.update(index, fraction, &self.events),
            None => self.events.emit(BackupEvent::Progress { fraction }),
        }
    }

    /// Delete live backups beyond `backup_versions`, oldest first.
    ///
    /// Returns how many files were deleted. Failures are logged and do not
    /// stop the remaining deletions.
    pub fn remove_old_backups(&self, game: &GameEntry) -> usize {
        let keep = self.settings.backup_versions as usize;
        if keep == 0 {
            return 0;
        }

        let backups = match self.list_backups_in(game, SavegameSubdir::Live) {
            Ok(backups) => backups,
            Err(e) => {
                tracing::warn!("[{}] cannot list backups for retention: {}", game.key, e);
                return 0;
            }
        };

        let mut removed = 0;
        for old in backups.iter().skip(keep) {
            self.events.emit(BackupEvent::RemoveBackup {
                key: game.key.clone(),
                path: old.path.clone(),
            });
            match std::fs::remove_file(&old.path) {
                Ok(()) => {
                    tracing::info!("[{}] removed old backup {}", game.key, old.path.display());
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] failed to remove old backup {}: {}",
                        game.key,
                        old.path.display(),
                        e
                    );
                }
            }
        }
        removed
    }

    /// Delete one backup file on request
    pub fn delete_backup(&self, game: &GameEntry, path: &Path) -> Result<()> {
        self.events.emit(BackupEvent::RemoveBackup {
            key: game.key.clone(),
            path: path.to_path_buf(),
        });
        std::fs::remove_file(path)?;
        tracing::info!("[{}] deleted backup {}", game.key, path.display());
        Ok(())
    }

    /// Archiver able to read `path`, trying the default archiver first
    pub fn find_archiver(&self, path: &Path) -> Option<Arc<dyn Archiver>> {
        let default = self.default_archiver().ok();
        let default_key = default.as_ref().map(|a| a.key().to_string());

        default
            .into_iter()
            .chain(
                self.archivers
                    .iter()
                    .filter(|a| Some(a.key()) != default_key.as_deref())
                    .cloned(),
            )
            .find(|a| a.is_archive(path))
    }

    /// Restore an archive of any registered format
    pub fn restore(&self, path: &Path) -> Result<RestoreResult> {
        let archiver = self
            .find_archiver(path)
            .ok_or_else(|| Error::NotAnArchive(path.to_path_buf()))?;
        tracing::info!("Restoring {} ({})", path.display(), archiver.key());
        archiver.restore(path, &self.settings)
    }

    /// All backups of a game, live and finished, newest first
    pub fn list_backups(&self, game: &GameEntry) -> Result<Vec<BackupInfo>> {
        let mut backups = self.list_backups_in(game, SavegameSubdir::Live)?;
        backups.extend(self.list_backups_in(game, SavegameSubdir::Finished)?);
        backups.sort_by(|a, b| b.name.timestamp.cmp(&a.name.timestamp));
        Ok(backups)
    }

    /// Backups of a game in one subdirectory, newest first.
    ///
    /// Only files whose name matches the game's savegame name and type and
    /// that a registered archiver recognizes are listed.
    pub fn list_backups_in(&self, game: &GameEntry, subdir: SavegameSubdir) -> Result<Vec<BackupInfo>> {
        let dir = backup_directory(
            &self.settings.backup_dir,
            &game.savegame_name,
            game.savegame_type,
            subdir,
        );
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let name = match path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(BackupFileName::parse)
            {
                Some(name) => name,
                None => continue,
            };
            if name.savegame_name != game.savegame_name
                || name.savegame_type != game.savegame_type
                || name.subdir != subdir
            {
                continue;
            }

            if let Some(archiver) = self.find_archiver(&path) {
                let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                backups.push(BackupInfo {
                    path,
                    name,
                    archiver_key: archiver.key().to_string(),
                    size_bytes,
                });
            }
        }

        // Names sort chronologically within one directory
        backups.sort_by(|a, b| b.filename().cmp(&a.filename()));
        Ok(backups)
    }
}

impl std::fmt::Debug for ArchiverManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiverManager")
            .field("settings", &self.settings)
            .field(
                "archivers",
                &self.archivers.iter().map(|a| a.key()).collect::<Vec<_>>(),
            )
            .field("backup_in_progress", &self.is_backup_in_progress())
            .finish()
    }
}
