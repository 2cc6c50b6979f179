//! Durable leaderboard storage.
//!
//! The store is read once at startup and written whenever the leaderboard
//! changes. Writes happen on a background task (see [`spawn_persistence`]) so
//! the game loop only pushes the new list into a channel.

use log::{error, info};
use shared::ScoreEntry;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("score file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("score file is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("score store lock poisoned")]
    Poisoned,
}

pub trait ScoreStore: Send + Sync {
    fn load(&self) -> Result<Vec<ScoreEntry>, StoreError>;
    fn save(&self, entries: &[ScoreEntry]) -> Result<(), StoreError>;
}

/// Leaderboard kept in a pretty-printed JSON array of `{name, score}`.
pub struct JsonFileScoreStore {
    path: PathBuf,
}

impl JsonFileScoreStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScoreStore for JsonFileScoreStore {
    fn load(&self) -> Result<Vec<ScoreEntry>, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No score file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, entries: &[ScoreEntry]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Volatile store, for tests and for running without a score file.
#[derive(Default)]
pub struct MemoryScoreStore {
    entries: Mutex<Vec<ScoreEntry>>,
}

impl MemoryScoreStore {
    pub fn new(entries: Vec<ScoreEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl ScoreStore for MemoryScoreStore {
    fn load(&self) -> Result<Vec<ScoreEntry>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.clone())
    }

    fn save(&self, entries: &[ScoreEntry]) -> Result<(), StoreError> {
        let mut stored = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        *stored = entries.to_vec();
        Ok(())
    }
}

/// Spawns the task that writes each leaderboard it receives to `store`.
/// Failed writes are logged and not retried; the next change writes again.
pub fn spawn_persistence(
    store: Arc<dyn ScoreStore>,
    mut updates: mpsc::UnboundedReceiver<Vec<ScoreEntry>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(entries) = updates.recv().await {
            let store = Arc::clone(&store);
            let result = tokio::task::spawn_blocking(move || store.save(&entries)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to save leaderboard: {}", e),
                Err(e) => error!("Leaderboard save task failed: {}", e),
            }
        }
    })
}
