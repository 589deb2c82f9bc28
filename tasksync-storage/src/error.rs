//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
///
/// Any error returned from inside [`LocalStore::execute`](crate::LocalStore::execute)
/// rolls back the whole transaction.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A foreign key, uniqueness or NOT NULL constraint failed.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Table is not declared in the sync schema.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Column is not declared on the table.
    #[error("unknown column {column} on table {table}")]
    UnknownColumn { table: String, column: String },

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The store was dropped.
    #[error("store closed")]
    Closed,
}

impl StorageError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation(message.unwrap_or_else(|| code.to_string()))
            }
            other => Self::Database(other),
        }
    }
}

impl From<tasksync_types::Error> for StorageError {
    fn from(err: tasksync_types::Error) -> Self {
        Self::InvalidData(err.to_string())
    }
}

impl From<uuid::Error> for StorageError {
    fn from(err: uuid::Error) -> Self {
        Self::InvalidData(format!("invalid identifier: {err}"))
    }
}
