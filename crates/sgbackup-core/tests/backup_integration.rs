//! Integration tests for backup, retention and restore workflows.
//!
//! These tests drive the [`ArchiverManager`] end to end against savegame
//! directories created in a temporary directory.

use sgbackup_core::archiver::backup_directory;
use sgbackup_core::{
    ArchiverManager, BackupEvent, BackupFileName, BackupOutcome, Error, GameData, GameEntry,
    SavegameSubdir, SavegameType, Settings, UnixGame, WindowsGame,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Test fixture with a savegame root and a backup directory.
struct TestFixture {
    _temp_dir: TempDir,
    save_root: PathBuf,
    backup_dir: PathBuf,
}

impl TestFixture {
    fn new() -> Self {
        init_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let save_root = temp_dir.path().join("saves");
        let backup_dir = temp_dir.path().join("backups");
        fs::create_dir_all(&save_root).expect("Failed to create save root");

        Self {
            _temp_dir: temp_dir,
            save_root,
            backup_dir,
        }
    }

    fn settings(&self) -> Settings {
        Settings::with_backup_dir(&self.backup_dir)
    }

    /// Writes files below `{save_root}/{dir}`.
    fn write_saves(&self, dir: &str, files: &[(&str, &str)]) {
        for (name, content) in files {
            let path = self.save_root.join(dir).join(name);
            fs::create_dir_all(path.parent().unwrap()).expect("Failed to create save dir");
            fs::write(&path, content).expect("Failed to write save");
        }
    }

    /// A Linux game whose savegames live in `{save_root}/{dir}`.
    fn game(&self, key: &str, dir: &str) -> GameEntry {
        let mut game = GameEntry::new(key, format!("Game {}", key), key, SavegameType::Linux);
        game.linux = Some(UnixGame {
            data: GameData::new(self.save_root.to_string_lossy(), dir),
            ..Default::default()
        });
        game
    }

    fn live_dir(&self, game: &GameEntry) -> PathBuf {
        backup_directory(
            &self.backup_dir,
            &game.savegame_name,
            game.savegame_type,
            SavegameSubdir::Live,
        )
    }
}

fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("Failed to read dir")
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_backup_and_restore_roundtrip() {
    let fixture = TestFixture::new();
    fixture.write_saves("demo", &[("slot1.sav", "one"), ("profiles/p.cfg", "cfg")]);
    let game = fixture.game("demo", "demo");

    for archiver in ["zipfile", "tarfile-gzip"] {
        let mut settings = fixture.settings();
        settings.default_archiver = archiver.to_string();
        let manager = ArchiverManager::new(settings);

        let backup = manager.backup_one(&game).expect("Backup failed");
        assert!(backup.starts_with(fixture.live_dir(&game)));

        fs::remove_dir_all(fixture.save_root.join("demo")).unwrap();
        let restored = manager.restore(&backup).expect("Restore failed");
        assert_eq!(restored.files_restored, 2);
        assert_eq!(restored.game, game);
        assert_eq!(
            fs::read_to_string(fixture.save_root.join("demo/slot1.sav")).unwrap(),
            "one"
        );
        assert_eq!(
            fs::read_to_string(fixture.save_root.join("demo/profiles/p.cfg")).unwrap(),
            "cfg"
        );

        fs::remove_file(&backup).unwrap();
    }
}

#[test]
fn test_single_backup_events() {
    let fixture = TestFixture::new();
    fixture.write_saves("solo", &[("a.sav", "a"), ("b.sav", "b")]);
    let game = fixture.game("solo", "solo");

    let manager = ArchiverManager::new(fixture.settings());
    let rx = manager.events().channel();
    let backup = manager.backup_one(&game).unwrap();

    let events: Vec<BackupEvent> = rx.try_iter().collect();
    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::Progress { fraction } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 3);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&1.0));

    let n = events.len();
    assert_eq!(
        events[n - 2],
        BackupEvent::GameFinished {
            key: "solo".to_string(),
            savegame_name: "solo".to_string(),
            outcome: BackupOutcome::Success(backup),
        }
    );
    assert_eq!(events[n - 1], BackupEvent::Finished);
}

#[test]
fn test_retention_keeps_newest_versions() {
    let fixture = TestFixture::new();
    fixture.write_saves("kept", &[("save.dat", "data")]);
    let game = fixture.game("kept", "kept");

    let mut manager = ArchiverManager::new(fixture.settings());
    let first = manager.backup_one(&game).unwrap();

    // Turn the first backup into four older versions
    let live = fixture.live_dir(&game);
    let old_names: Vec<String> = (1..=4)
        .map(|day| format!("kept.2020010{}-120000.linux.live.sgbackup.zip", day))
        .collect();
    for name in &old_names {
        fs::copy(&first, live.join(name)).unwrap();
    }
    fs::remove_file(&first).unwrap();

    manager.settings_mut().backup_versions = 2;
    let rx = manager.events().channel();
    let newest = manager.backup_one(&game).unwrap();

    let removed: Vec<PathBuf> = rx
        .try_iter()
        .filter_map(|e| match e {
            BackupEvent::RemoveBackup { key, path } => {
                assert_eq!(key, "kept");
                Some(path)
            }
            _ => None,
        })
        .collect();
    assert_eq!(removed.len(), 3);

    let remaining = sorted_names(&live);
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0], old_names[3]);
    assert_eq!(
        remaining[1],
        newest.file_name().unwrap().to_string_lossy()
    );
}

#[test]
fn test_retention_continues_past_failed_deletion() {
    let fixture = TestFixture::new();
    fixture.write_saves("stubborn", &[("save.dat", "data")]);
    let game = fixture.game("stubborn", "stubborn");

    let mut manager = ArchiverManager::new(fixture.settings());
    manager.settings_mut().backup_versions = 0;
    let newest = manager.backup_one(&game).unwrap();

    let live = fixture.live_dir(&game);
    for day in 1..=3 {
        let name = format!("stubborn.2020010{}-120000.linux.live.sgbackup.zip", day);
        fs::copy(&newest, live.join(name)).unwrap();
    }

    // The first old backup vanishes before retention gets to delete it
    let first = AtomicBool::new(true);
    manager.events().subscribe(move |event| {
        if let BackupEvent::RemoveBackup { path, .. } = event {
            if first.swap(false, Ordering::SeqCst) {
                fs::remove_file(path).unwrap();
            }
        }
    });

    manager.settings_mut().backup_versions = 1;
    assert_eq!(manager.remove_old_backups(&game), 2);
    assert_eq!(
        sorted_names(&live),
        vec![newest.file_name().unwrap().to_string_lossy().into_owned()]
    );
}

#[test]
fn test_retention_ignores_finished_games() {
    let fixture = TestFixture::new();
    fixture.write_saves("done", &[("save.dat", "data")]);
    let mut game = fixture.game("done", "done");
    game.is_live = false;

    let mut settings = fixture.settings();
    settings.backup_versions = 1;
    let manager = ArchiverManager::new(settings);

    let backup = manager.backup_one(&game).unwrap();
    let finished = backup_directory(
        &fixture.backup_dir,
        "done",
        SavegameType::Linux,
        SavegameSubdir::Finished,
    );
    assert!(backup.starts_with(&finished));
    fs::copy(&backup, finished.join("done.20200101-000000.linux.finished.sgbackup.zip")).unwrap();

    manager.backup_one(&game).unwrap();
    assert!(sorted_names(&finished).len() >= 2);
}

#[test]
fn test_concurrent_batch_backup() {
    let fixture = TestFixture::new();
    let games: Vec<GameEntry> = (0..10)
        .map(|i| {
            let key = format!("game{:02}", i);
            fixture.write_saves(&key, &[("a.sav", "a"), ("b.sav", "b"), ("c/d.sav", "d")]);
            fixture.game(&key, &key)
        })
        .collect();

    let mut settings = fixture.settings();
    settings.backup_threads = 3;
    let manager = ArchiverManager::new(settings);
    let rx = manager.events().channel();

    let report = manager.backup_many(&games).expect("Batch failed");
    assert_eq!(report.succeeded(), 10);
    assert_eq!(report.failed(), 0);
    assert!(!manager.is_backup_in_progress());

    let events: Vec<BackupEvent> = rx.try_iter().collect();

    let mut finished: HashMap<String, usize> = HashMap::new();
    for event in &events {
        if let BackupEvent::GameFinished { key, outcome, .. } = event {
            assert!(outcome.is_success());
            *finished.entry(key.clone()).or_default() += 1;
        }
    }
    assert_eq!(finished.len(), 10);
    assert!(finished.values().all(|&count| count == 1));

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::Progress { fraction } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert!(progress.iter().all(|f| (0.0..=1.0).contains(f)));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&1.0));

    let finished_events = events
        .iter()
        .filter(|e| matches!(e, BackupEvent::Finished))
        .count();
    assert_eq!(finished_events, 1);
    assert_eq!(events.last(), Some(&BackupEvent::Finished));

    for game in &games {
        assert_eq!(sorted_names(&fixture.live_dir(game)).len(), 1);
    }
}

#[test]
fn test_batch_continues_past_failing_games() {
    let fixture = TestFixture::new();
    fixture.write_saves("good", &[("a.sav", "a")]);
    fs::create_dir_all(fixture.save_root.join("empty")).unwrap();

    let good = fixture.game("good", "good");
    let missing = fixture.game("missing", "does-not-exist");
    let empty = fixture.game("empty", "empty");
    let unconfigured = GameEntry::new("bare", "Bare", "bare", SavegameType::Linux);

    let mut settings = fixture.settings();
    settings.backup_threads = 2;
    let manager = ArchiverManager::new(settings);

    let empty_dir = fixture.backup_dir.join(&empty.savegame_name);
    let missing_dir = fixture.backup_dir.join(&missing.savegame_name);

    let report = manager
        .backup_many(&[missing, good, empty, unconfigured])
        .unwrap();

    let outcomes: HashMap<String, BackupOutcome> = report.outcomes.into_iter().collect();
    assert!(outcomes["good"].is_success());
    assert!(matches!(outcomes["missing"], BackupOutcome::Skipped(_)));
    assert!(matches!(outcomes["empty"], BackupOutcome::Skipped(_)));
    assert!(matches!(outcomes["bare"], BackupOutcome::Failed(_)));

    // Skipped games leave no directories behind
    assert!(!empty_dir.exists());
    assert!(!missing_dir.exists());
}

#[test]
fn test_empty_batch_only_finishes() {
    let fixture = TestFixture::new();
    let manager = ArchiverManager::new(fixture.settings());
    let rx = manager.events().channel();

    let report = manager.backup_many(&[]).unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![BackupEvent::Finished]);
}

#[test]
fn test_games_sharing_a_root_stay_separate() {
    let fixture = TestFixture::new();
    fixture.write_saves("Alpha", &[("alpha.sav", "alpha")]);
    fixture.write_saves("Beta", &[("beta.sav", "beta")]);
    let alpha = fixture.game("alpha", "Alpha");
    let beta = fixture.game("beta", "Beta");

    let manager = ArchiverManager::new(fixture.settings());
    let alpha_backup = manager.backup_one(&alpha).unwrap();
    let beta_backup = manager.backup_one(&beta).unwrap();

    fs::remove_dir_all(fixture.save_root.join("Alpha")).unwrap();
    fs::remove_dir_all(fixture.save_root.join("Beta")).unwrap();

    manager.restore(&alpha_backup).unwrap();
    assert!(fixture.save_root.join("Alpha/alpha.sav").exists());
    assert!(!fixture.save_root.join("Beta").exists());

    manager.restore(&beta_backup).unwrap();
    assert!(fixture.save_root.join("Beta/beta.sav").exists());
    assert!(!fixture.save_root.join("Beta/alpha.sav").exists());
}

#[test]
fn test_concurrent_windows_games_write_disjoint_trees() {
    let fixture = TestFixture::new();
    fixture.write_saves("Alpha", &[("alpha.sav", "alpha")]);
    fixture.write_saves("Beta", &[("beta.sav", "beta")]);

    let games: Vec<GameEntry> = ["Alpha", "Beta"]
        .iter()
        .map(|name| {
            let mut game = GameEntry::new(name.to_lowercase(), *name, *name, SavegameType::Windows);
            game.windows = Some(WindowsGame {
                data: GameData::new(fixture.save_root.to_string_lossy(), *name),
                installdir: None,
            });
            game
        })
        .collect();

    let mut settings = fixture.settings();
    settings.backup_threads = 2;
    let manager = ArchiverManager::new(settings);
    let report = manager.backup_many(&games).unwrap();
    assert_eq!(report.succeeded(), 2);

    for (game, (key, outcome)) in games.iter().zip(&report.outcomes) {
        assert_eq!(&game.key, key);
        let path = match outcome {
            BackupOutcome::Success(path) => path,
            other => panic!("unexpected outcome {:?}", other),
        };
        let name = BackupFileName::parse(&path.file_name().unwrap().to_string_lossy()).unwrap();
        assert_eq!(name.savegame_name, game.savegame_name);
        assert_eq!(name.savegame_type, SavegameType::Windows);
        assert!(path.starts_with(fixture.backup_dir.join(&game.savegame_name).join("windows/live")));
        assert_eq!(sorted_names(&fixture.live_dir(game)).len(), 1);
    }
}

#[test]
fn test_overlapping_runs_are_rejected() {
    let fixture = TestFixture::new();
    fixture.write_saves("busy", &[("a.sav", "a")]);
    let game = fixture.game("busy", "busy");
    let manager = ArchiverManager::new(fixture.settings());

    {
        let _run = manager.begin_run().unwrap();
        assert!(matches!(
            manager.backup_one(&game),
            Err(Error::BackupAlreadyInProgress)
        ));
        assert!(matches!(
            manager.backup_many(std::slice::from_ref(&game)),
            Err(Error::BackupAlreadyInProgress)
        ));
        assert!(!fixture.backup_dir.exists());
    }

    assert!(manager.backup_one(&game).is_ok());
}

#[test]
fn test_restore_detects_archive_format() {
    let fixture = TestFixture::new();
    fixture.write_saves("fmt", &[("a.sav", "a")]);
    let game = fixture.game("fmt", "fmt");

    let mut settings = fixture.settings();
    settings.default_archiver = "tarfile-xz".to_string();
    let backup = ArchiverManager::new(settings).backup_one(&game).unwrap();

    // A manager defaulting to zip still finds the tar.xz archiver
    let manager = ArchiverManager::new(fixture.settings());
    assert_eq!(manager.find_archiver(&backup).unwrap().key(), "tarfile-xz");
    fs::remove_dir_all(fixture.save_root.join("fmt")).unwrap();
    assert_eq!(manager.restore(&backup).unwrap().files_restored, 1);
    assert!(fixture.save_root.join("fmt/a.sav").exists());

    let text = fixture.save_root.join("notes.txt");
    fs::write(&text, "not an archive").unwrap();
    assert!(matches!(manager.restore(&text), Err(Error::NotAnArchive(_))));
}

#[test]
fn test_list_and_delete_backups() {
    let fixture = TestFixture::new();
    fixture.write_saves("list", &[("a.sav", "a")]);
    let game = fixture.game("list", "list");
    let manager = ArchiverManager::new(fixture.settings());

    let backup = manager.backup_one(&game).unwrap();
    let live = fixture.live_dir(&game);
    let older = live.join("list.20200101-000000.linux.live.sgbackup.zip");
    fs::copy(&backup, &older).unwrap();
    fs::write(live.join("list.20200102-000000.linux.live.sgbackup.zip"), "junk").unwrap();
    fs::write(live.join("readme.txt"), "ignored").unwrap();

    let backups = manager.list_backups(&game).unwrap();
    assert_eq!(backups.len(), 2);
    assert_eq!(backups[0].path, backup);
    assert_eq!(backups[1].path, older);
    assert!(backups.iter().all(|b| b.archiver_key == "zipfile"));

    let rx = manager.events().channel();
    manager.delete_backup(&game, &older).unwrap();
    assert!(!older.exists());
    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec![BackupEvent::RemoveBackup {
            key: "list".to_string(),
            path: older,
        }]
    );
    assert_eq!(manager.list_backups(&game).unwrap().len(), 1);
}
