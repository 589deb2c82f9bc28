//! Error types for the sync layer.

use tasksync_storage::StorageError;
use tasksync_types::RecordName;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store error. The failed transaction was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Network failure or timeout. Retried with backoff.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// The remote refused the request. Not retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A pulled record waited for its parent longer than the retention period.
    #[error("record {record} references {parent}, which never arrived")]
    OrphanedReference { record: RecordName, parent: RecordName },

    /// A record, mapping or row that should exist does not.
    #[error("unknown record: {0}")]
    UnknownRecord(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientTransport(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<tasksync_types::Error> for SyncError {
    fn from(err: tasksync_types::Error) -> Self {
        Self::UnknownRecord(err.to_string())
    }
}
