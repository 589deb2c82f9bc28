//! Core type definitions for tasksync.
//!
//! This crate defines the fundamental, table-agnostic types used throughout
//! the sync engine:
//! - Entity and device identifiers (UUID v7)
//! - Remote record identities (`RecordType`, `RecordName`)
//! - Opaque, ordered remote version tokens (`RecordVersion`)
//!
//! Domain rows (groups, tasks, private task state) live in `tasksync-model`.

mod ids;
mod record;

pub use ids::{DeviceId, EntityId};
pub use record::{RecordName, RecordType, RecordVersion};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid record name: {0}")]
    InvalidRecordName(String),
}
