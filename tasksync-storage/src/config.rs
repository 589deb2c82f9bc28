use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for opening the local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite file holding shared, private and sync tables.
    pub path: PathBuf,
    /// How long a writer waits on a locked database file (ms).
    pub busy_timeout_ms: u64,
    /// Capacity of the change notification channel.
    pub change_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tasksync.db"),
            busy_timeout_ms: 5_000,
            change_buffer: 256,
        }
    }
}

impl StoreConfig {
    /// Config for a store file at `path` with default settings.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}
