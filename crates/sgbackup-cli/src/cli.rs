//! Headless command line mode
//!
//! Usage:
//!   sgbackup games                     List configured games
//!   sgbackup backup <key>...           Back up the given games
//!   sgbackup backup-all                Back up every active game
//!   sgbackup backups <key>             List backups of a game
//!   sgbackup restore <archive>         Restore a backup archive
//!   sgbackup archivers                 List archive formats
//!
//! Options:
//!   --config <path>    Settings file to use
//!   --threads <n>      Worker threads for batch backups
//!   --archiver <key>   Archive format for new backups
//!   --json             Output in JSON format
//!   --verbose          Debug logging

use std::path::PathBuf;

use anyhow::Context;
use sgbackup_core::{
    ArchiverManager, BackupEvent, BackupOutcome, GameEntry, GameManager, GameRegistry, Settings,
};

/// CLI command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Games,
    Backup { keys: Vec<String> },
    BackupAll,
    Backups { key: String },
    Restore { archive: PathBuf },
    Archivers,
}

/// CLI options
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub threads: Option<usize>,
    pub archiver: Option<String>,
    pub json: bool,
    pub verbose: bool,
}

/// Parse CLI arguments and return command + options
pub fn parse_args(args: &[String]) -> Result<(CliCommand, CliOptions), String> {
    let mut options = CliOptions::default();
    let mut command: Option<&str> = None;
    let mut operands: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--json" => options.json = true,
            "--verbose" | "-v" => options.verbose = true,
            "--config" | "--threads" | "--archiver" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| format!("{} requires a value", arg))?;
                match arg.as_str() {
                    "--config" => options.config = Some(PathBuf::from(value)),
                    "--threads" => options.threads = Some(parse_threads(value)?),
                    _ => options.archiver = Some(value.clone()),
                }
            }
            flag if flag.starts_with('-') => return Err(format!("Unknown option: {}", flag)),
            word => match command {
                None => command = Some(word),
                Some(_) => operands.push(word.to_string()),
            },
        }
        i += 1;
    }

    let command = match command {
        Some("games") => CliCommand::Games,
        Some("backup") => {
            if operands.is_empty() {
                return Err("backup requires at least one game key".to_string());
            }
            CliCommand::Backup { keys: operands }
        }
        Some("backup-all") => CliCommand::BackupAll,
        Some("backups") => CliCommand::Backups {
            key: single_operand("backups", "a game key", operands)?,
        },
        Some("restore") => CliCommand::Restore {
            archive: PathBuf::from(single_operand("restore", "an archive path", operands)?),
        },
        Some("archivers") => CliCommand::Archivers,
        Some(other) => return Err(format!("Unknown command: {}", other)),
        None => {
            return Err(
                "No command specified. Use: games, backup, backup-all, backups, restore or archivers"
                    .to_string(),
            )
        }
    };

    Ok((command, options))
}

fn parse_threads(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("Invalid thread count: {}", s)),
    }
}

fn single_operand(command: &str, what: &str, mut operands: Vec<String>) -> Result<String, String> {
    if operands.len() != 1 {
        return Err(format!("{} requires {}", command, what));
    }
    Ok(operands.remove(0))
}

/// Run CLI command
pub fn run(command: CliCommand, options: CliOptions) -> anyhow::Result<()> {
    let settings = load_settings(&options)?;

    match command {
        CliCommand::Games => run_games(&settings, &options),
        CliCommand::Backup { keys } => run_backup(settings, &keys, &options),
        CliCommand::BackupAll => run_backup_all(settings, &options),
        CliCommand::Backups { key } => run_backups(settings, &key, &options),
        CliCommand::Restore { archive } => run_restore(settings, archive, &options),
        CliCommand::Archivers => run_archivers(settings, &options),
    }
}

fn load_settings(options: &CliOptions) -> anyhow::Result<Settings> {
    let mut settings = match &options.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::load(),
    };

    if let Some(threads) = options.threads {
        settings.backup_threads = threads;
    }
    if let Some(archiver) = &options.archiver {
        settings.default_archiver = archiver.clone();
    }
    Ok(settings)
}

fn load_games(settings: &Settings) -> anyhow::Result<GameManager> {
    let games = GameManager::load(&settings.games_dir)
        .with_context(|| format!("Failed to load games from {}", settings.games_dir.display()))?;
    tracing::debug!("Loaded {} games from {}", games.len(), settings.games_dir.display());
    Ok(games)
}

fn lookup<'a>(games: &'a GameManager, key: &str) -> anyhow::Result<&'a GameEntry> {
    games
        .get_game(key)
        .ok_or_else(|| anyhow::anyhow!("Game not found: {}", key))
}

/// Print backup events to stderr as they arrive
fn attach_progress(manager: &ArchiverManager) {
    manager.events().subscribe(|event| match event {
        BackupEvent::Progress { fraction } => {
            eprint!("\rBackup: {:>3.0}%", fraction * 100.0);
        }
        BackupEvent::GameFinished { key, outcome, .. } => match outcome {
            BackupOutcome::Success(path) => eprintln!("\r[{}] backed up to {}", key, path.display()),
            BackupOutcome::Skipped(reason) => eprintln!("\r[{}] skipped: {}", key, reason),
            BackupOutcome::Failed(reason) => eprintln!("\r[{}] failed: {}", key, reason),
        },
        BackupEvent::RemoveBackup { key, path } => {
            eprintln!("\r[{}] removing old backup {}", key, path.display());
        }
        BackupEvent::Finished => eprintln!(),
        BackupEvent::GameProgress { .. } => {}
    });
}

fn run_games(settings: &Settings, options: &CliOptions) -> anyhow::Result<()> {
    let games = load_games(settings)?;
    let variables = settings.variables();

    if options.json {
        let items: Vec<_> = games
            .list_games()
            .into_iter()
            .map(|game| {
                serde_json::json!({
                    "key": game.key,
                    "name": game.name,
                    "savegame_name": game.savegame_name,
                    "savegame_type": game.savegame_type.as_str(),
                    "active": game.is_active,
                    "live": game.is_live,
                    "valid": game.is_valid(&variables),
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "games": items }));
    } else if games.is_empty() {
        println!("No games configured in {}", settings.games_dir.display());
    } else {
        println!("Games ({}):", games.len());
        for game in games.list_games() {
            let mut flags = Vec::new();
            if !game.is_active {
                flags.push("inactive");
            }
            if !game.is_live {
                flags.push("finished");
            }
            if !game.is_valid(&variables) {
                flags.push("invalid");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            };
            println!(
                "  {:<24} {:<16} {}{}",
                game.key, game.savegame_type, game.name, flags
            );
        }
    }
    Ok(())
}

fn run_backup(settings: Settings, keys: &[String], options: &CliOptions) -> anyhow::Result<()> {
    let games = load_games(&settings)?;
    let selected = keys
        .iter()
        .map(|key| lookup(&games, key).cloned())
        .collect::<anyhow::Result<Vec<_>>>()?;

    let manager = ArchiverManager::new(settings);
    if !options.json {
        attach_progress(&manager);
    }

    if let [game] = selected.as_slice() {
        match manager.backup_one(game) {
            Ok(path) => {
                if options.json {
                    println!("{}", serde_json::json!({ "key": game.key, "path": path }));
                }
                Ok(())
            }
            Err(e) if e.is_nothing_to_backup() => {
                if options.json {
                    println!("{}", serde_json::json!({ "key": game.key, "skipped": e.to_string() }));
                }
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Backup of {} failed", game.key)),
        }
    } else {
        run_batch(&manager, &selected, options)
    }
}

fn run_backup_all(settings: Settings, options: &CliOptions) -> anyhow::Result<()> {
    let games = load_games(&settings)?;
    let active: Vec<GameEntry> = games.active_games().into_iter().cloned().collect();

    let manager = ArchiverManager::new(settings);
    if !options.json {
        attach_progress(&manager);
    }
    run_batch(&manager, &active, options)
}

fn run_batch(manager: &ArchiverManager, games: &[GameEntry], options: &CliOptions) -> anyhow::Result<()> {
    let report = manager.backup_many(games)?;

    if options.json {
        let items: Vec<_> = report
            .outcomes
            .iter()
            .map(|(key, outcome)| match outcome {
                BackupOutcome::Success(path) => serde_json::json!({ "key": key, "path": path }),
                BackupOutcome::Skipped(reason) => serde_json::json!({ "key": key, "skipped": reason }),
                BackupOutcome::Failed(reason) => serde_json::json!({ "key": key, "error": reason }),
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "summary": {
                    "succeeded": report.succeeded(),
                    "skipped": report.skipped(),
                    "failed": report.failed(),
                },
                "games": items
            })
        );
    } else {
        println!("Backup Complete:");
        println!("  Succeeded: {}", report.succeeded());
        println!("  Skipped:   {}", report.skipped());
        println!("  Failed:    {}", report.failed());
    }

    if report.failed() > 0 {
        anyhow::bail!("{} of {} backups failed", report.failed(), games.len());
    }
    Ok(())
}

fn run_backups(settings: Settings, key: &str, options: &CliOptions) -> anyhow::Result<()> {
    let games = load_games(&settings)?;
    let game = lookup(&games, key)?;
    let manager = ArchiverManager::new(settings);
    let backups = manager.list_backups(game)?;

    if options.json {
        let items: Vec<_> = backups
            .iter()
            .map(|b| {
                serde_json::json!({
                    "path": b.path,
                    "timestamp": b.name.timestamp.to_string(),
                    "subdir": b.name.subdir.as_str(),
                    "archiver": b.archiver_key,
                    "size_bytes": b.size_bytes,
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "key": game.key, "backups": items }));
    } else if backups.is_empty() {
        println!("No backups of {}", game.key);
    } else {
        println!("Backups of {} ({}):", game.key, backups.len());
        for backup in &backups {
            println!(
                "  {}  {:<8} {:<14} {:>10} bytes  {}",
                backup.name.timestamp,
                backup.name.subdir,
                backup.archiver_key,
                backup.size_bytes,
                backup.filename()
            );
        }
    }
    Ok(())
}

fn run_restore(settings: Settings, archive: PathBuf, options: &CliOptions) -> anyhow::Result<()> {
    let manager = ArchiverManager::new(settings);
    let result = manager
        .restore(&archive)
        .with_context(|| format!("Failed to restore {}", archive.display()))?;

    if options.json {
        println!(
            "{}",
            serde_json::json!({
                "key": result.game.key,
                "root": result.root,
                "files_restored": result.files_restored,
            })
        );
    } else {
        println!(
            "Restored {} files of {} into {}",
            result.files_restored,
            result.game.key,
            result.root.display()
        );
    }
    Ok(())
}

fn run_archivers(settings: Settings, options: &CliOptions) -> anyhow::Result<()> {
    let manager = ArchiverManager::new(settings);
    let default_key = manager.default_archiver()?.key().to_string();

    if options.json {
        let items: Vec<_> = manager
            .archivers()
            .iter()
            .map(|a| {
                serde_json::json!({
                    "key": a.key(),
                    "extension": a.extension(),
                    "description": a.description(),
                    "default": a.key() == default_key,
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "archivers": items }));
    } else {
        println!("Archivers:");
        for archiver in manager.archivers() {
            let marker = if archiver.key() == default_key { "*" } else { " " };
            println!(
                "  {} {:<14} .{:<8} {}",
                marker,
                archiver.key(),
                archiver.extension(),
                archiver.description()
            );
        }
    }
    Ok(())
}

/// Print CLI help
pub fn print_help() {
    println!("sgbackup v{}", env!("CARGO_PKG_VERSION"));
    println!("Back up and restore game savegames");
    println!();
    println!("USAGE:");
    println!("    sgbackup <command> [options]");
    println!();
    println!("COMMANDS:");
    println!("    games                       List configured games");
    println!("    backup <key>...             Back up the given games");
    println!("    backup-all                  Back up every active game");
    println!("    backups <key>               List backups of a game");
    println!("    restore <archive>           Restore a backup archive");
    println!("    archivers                   List archive formats");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>             Settings file to use");
    println!("    --threads <n>               Worker threads for batch backups");
    println!("    --archiver <key>            Archive format for new backups");
    println!("    --json                      Output in JSON format");
    println!("    --verbose, -v               Debug logging (RUST_LOG overrides)");
    println!();
    println!("EXAMPLES:");
    println!("    sgbackup backup-all --threads 4");
    println!("    sgbackup backup stardew --archiver tarfile-xz");
    println!("    sgbackup backups stardew --json");
}
