//! Per-record sync state.
//!
//! ```text
//! LocalOnly → Pushing → Synced → (ConflictDetected → Resolving → Synced) | Deleted
//! ```
//!
//! The state is persisted next to the identity mapping, so a restart resumes
//! where the previous process stopped: a record left in `Pushing` is simply
//! pushed again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Created locally, never acknowledged by the remote.
    LocalOnly,
    /// A push is in flight, or the last push failed.
    Pushing,
    /// The remote acknowledged the row, or the row came from the remote.
    Synced,
    /// A newer remote version arrived while a local change was pending.
    ConflictDetected,
    /// The remote column set is replacing the local row.
    Resolving,
    /// Deleted locally; the deletion has not been acknowledged yet.
    Deleted,
}

impl SyncState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::Pushing => "pushing",
            Self::Synced => "synced",
            Self::ConflictDetected => "conflict_detected",
            Self::Resolving => "resolving",
            Self::Deleted => "deleted",
        }
    }

    /// Whether moving to `next` follows the lifecycle.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (LocalOnly, Pushing)
                | (LocalOnly, Deleted)
                | (Pushing, Pushing)
                | (Pushing, Synced)
                | (Pushing, Deleted)
                | (Pushing, ConflictDetected)
                | (Synced, Pushing)
                | (Synced, Deleted)
                | (Synced, ConflictDetected)
                | (Synced, Synced)
                | (LocalOnly, ConflictDetected)
                | (ConflictDetected, Resolving)
                | (Resolving, Synced)
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "local_only" => Self::LocalOnly,
            "pushing" => Self::Pushing,
            "synced" => Self::Synced,
            "conflict_detected" => Self::ConflictDetected,
            "resolving" => Self::Resolving,
            "deleted" => Self::Deleted,
            other => return Err(format!("unknown sync state: {other}")),
        })
    }
}
