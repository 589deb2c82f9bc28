//! Synchronization of the shared tables with a remote record store.
//!
//! # Architecture
//!
//! - every shared row has a [`RecordMapping`] in `sync_metadata`: its record
//!   name, the last remote version seen and a [`SyncState`]
//! - [`SyncTracker`] keeps mappings current from inside local write
//!   transactions; rows applied from the remote are mapped by the engine
//! - [`SyncEngine`] pushes dirty mappings (parents first) and applies pulled
//!   records one transaction each, parking records whose parent is unknown
//! - conflicts resolve in favor of the strictly newer remote version
//! - [`SharingManager`] shares a group with every task linked under it
//! - [`SyncScheduler`] runs rounds in the background
//!
//! Transports implement [`RemoteTransport`]; [`transport::memory`] is an
//! in-process one.

mod config;
mod context;
mod engine;
mod error;
pub mod identity;
pub mod pending;
mod scheduler;
mod sharing;
mod state;
mod tracker;
pub mod transport;

pub use config::SyncConfig;
pub use context::SyncContext;
pub use engine::{ApplyOutcome, PullReport, PushReport, SyncEngine, SyncReport};
pub use error::{SyncError, SyncResult};
pub use identity::RecordMapping;
pub use pending::PendingApplication;
pub use scheduler::{SchedulerHandle, SyncCommand, SyncEvent, SyncScheduler};
pub use sharing::{share_title, ShareInvitation, SharingManager};
pub use state::SyncState;
pub use tracker::{adopt_untracked, SyncTracker};
pub use transport::{
    IncomingRecord, InvitationHandle, OutgoingRecord, RemoteTransport, ShareMetadata,
};
