//! Backup events and their subscribers
//!
//! Events are delivered synchronously, in emission order, on the thread that
//! emits them. A subscriber added before an emission sees that emission.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, PoisonError, RwLock};

/// How a single game's backup ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Archive written to this path
    Success(PathBuf),
    /// Nothing to back up (missing directory or no matching files)
    Skipped(String),
    Failed(String),
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BackupOutcome::Success(_))
    }
}

/// Notification emitted by the archiver manager
#[derive(Debug, Clone, PartialEq)]
pub enum BackupEvent {
    /// Progress of one game's archive
    GameProgress {
        key: String,
        savegame_name: String,
        fraction: f64,
        message: String,
    },
    /// One game's backup is over, successfully or not
    GameFinished {
        key: String,
        savegame_name: String,
        outcome: BackupOutcome,
    },
    /// Overall progress: the batch mean, or the single game's progress
    Progress { fraction: f64 },
    /// A top-level backup run is over
    Finished,
    /// A backup file is about to be deleted
    RemoveBackup { key: String, path: PathBuf },
}

type Subscriber = Arc<dyn Fn(&BackupEvent) + Send + Sync>;

/// Synchronous publish/subscribe bus for [`BackupEvent`]s
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f` for every event emitted from now on
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&BackupEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(f));
    }

    /// Receive every event emitted from now on through a channel
    pub fn channel(&self) -> Receiver<BackupEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    pub fn emit(&self, event: BackupEvent) {
        // Snapshot so subscribers may subscribe from inside a callback
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscriber in subscribers {
            subscriber(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
