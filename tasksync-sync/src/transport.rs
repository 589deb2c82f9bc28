//! Remote record store abstraction.
//!
//! The engine only ever talks to a [`RemoteTransport`]: push one record, pull
//! the changes since the last pull, create a share. Payloads are column bags
//! keyed by column name; no wire format is implied.

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasksync_model::Row;
use tasksync_types::{RecordName, RecordType, RecordVersion};

/// A local change on its way to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingRecord {
    pub record_type: RecordType,
    pub record_name: RecordName,
    /// Shared columns only. Empty for deletions.
    pub payload: Row,
    pub parent: Option<RecordName>,
    pub deleted: bool,
    /// Remote version the change was based on.
    pub base_version: Option<RecordVersion>,
}

/// A change fetched from the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRecord {
    pub record_type: RecordType,
    pub record_name: RecordName,
    pub payload: Row,
    pub parent: Option<RecordName>,
    pub deleted: bool,
    pub version: RecordVersion,
}

/// What the remote shows invitees of a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMetadata {
    pub title: String,
}

/// Remote-side handle of a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationHandle {
    pub share_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// The remote record store.
///
/// Implementations report network failures and timeouts as
/// [`SyncError::TransientTransport`](crate::SyncError::TransientTransport) and
/// refusals as [`SyncError::Transport`](crate::SyncError::Transport).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Writes (or deletes) one record and returns the version the remote
    /// assigned.
    async fn push(&self, record: OutgoingRecord) -> SyncResult<RecordVersion>;

    /// Returns the changes made by other devices since the previous pull.
    async fn pull(&self) -> SyncResult<Vec<IncomingRecord>>;

    /// Shares `root` and everything linked under it. Idempotent per root.
    async fn share(&self, root: &RecordName, metadata: ShareMetadata)
        -> SyncResult<InvitationHandle>;
}

/// An in-memory remote for tests and demos.
pub mod memory {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tasksync_types::DeviceId;
    use tracing::debug;

    /// A record as the remote stores it.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RemoteRecord {
        pub record_type: RecordType,
        pub payload: Row,
        pub parent: Option<RecordName>,
        pub deleted: bool,
        pub version: RecordVersion,
    }

    #[derive(Debug, Clone)]
    struct ChangeEntry {
        author: Option<DeviceId>,
        record: IncomingRecord,
    }

    #[derive(Debug, Default)]
    struct RemoteState {
        records: HashMap<RecordName, RemoteRecord>,
        log: Vec<ChangeEntry>,
        last_version: u64,
        shares: HashMap<RecordName, InvitationHandle>,
    }

    /// The shared server. Cheap to clone; clones see the same records.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryRemote {
        state: Arc<Mutex<RemoteState>>,
    }

    impl MemoryRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// A connection for one device, starting at the beginning of the
        /// change log.
        pub fn connect(&self, device: DeviceId) -> MemoryTransport {
            MemoryTransport {
                remote: self.clone(),
                device,
                cursor: Mutex::new(0),
                inbox: Mutex::new(VecDeque::new()),
                failing_pushes: AtomicU32::new(0),
                failing_pulls: AtomicU32::new(0),
                refusing_pushes: AtomicU32::new(0),
            }
        }

        /// Writes a record as if a device outside this process pushed it.
        pub fn publish(
            &self,
            record_name: RecordName,
            payload: Row,
            parent: Option<RecordName>,
            deleted: bool,
        ) -> RecordVersion {
            let record_type = record_name.record_type().clone();
            self.lock()
                .write(None, record_type, record_name, payload, parent, deleted)
        }

        /// The current remote copy of a record.
        pub fn record(&self, record_name: &RecordName) -> Option<RemoteRecord> {
            self.lock().records.get(record_name).cloned()
        }

        /// Records not deleted on the remote.
        pub fn live_records(&self) -> Vec<RecordName> {
            let mut names: Vec<RecordName> = self
                .lock()
                .records
                .iter()
                .filter(|(_, r)| !r.deleted)
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            names
        }

        pub fn share_of(&self, root: &RecordName) -> Option<InvitationHandle> {
            self.lock().shares.get(root).cloned()
        }

        fn lock(&self) -> MutexGuard<'_, RemoteState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl RemoteState {
        fn write(
            &mut self,
            author: Option<DeviceId>,
            record_type: RecordType,
            record_name: RecordName,
            payload: Row,
            parent: Option<RecordName>,
            deleted: bool,
        ) -> RecordVersion {
            self.last_version += 1;
            let version = RecordVersion::new(self.last_version);
            self.records.insert(
                record_name.clone(),
                RemoteRecord {
                    record_type: record_type.clone(),
                    payload: payload.clone(),
                    parent: parent.clone(),
                    deleted,
                    version,
                },
            );
            if deleted {
                self.shares.remove(&record_name);
            }
            self.log.push(ChangeEntry {
                author,
                record: IncomingRecord {
                    record_type,
                    record_name,
                    payload,
                    parent,
                    deleted,
                    version,
                },
            });
            version
        }
    }

    /// One device's connection to a [`MemoryRemote`].
    ///
    /// Pulls skip changes this device pushed itself.
    #[derive(Debug)]
    pub struct MemoryTransport {
        remote: MemoryRemote,
        device: DeviceId,
        cursor: Mutex<usize>,
        inbox: Mutex<VecDeque<IncomingRecord>>,
        failing_pushes: AtomicU32,
        failing_pulls: AtomicU32,
        refusing_pushes: AtomicU32,
    }

    impl MemoryTransport {
        pub fn device(&self) -> DeviceId {
            self.device
        }

        /// Fails the next `count` pushes with a transient error.
        pub fn fail_next_pushes(&self, count: u32) {
            self.failing_pushes.store(count, Ordering::SeqCst);
        }

        /// Fails the next `count` pulls with a transient error.
        pub fn fail_next_pulls(&self, count: u32) {
            self.failing_pulls.store(count, Ordering::SeqCst);
        }

        /// Refuses the next `count` pushes with a permanent error.
        pub fn refuse_next_pushes(&self, count: u32) {
            self.refusing_pushes.store(count, Ordering::SeqCst);
        }

        /// Queues a record for the next pull, ahead of the change log.
        ///
        /// Lets tests replay stale or out-of-order deliveries.
        pub fn deliver(&self, record: IncomingRecord) {
            self.inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(record);
        }

        fn take_one(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl RemoteTransport for MemoryTransport {
        async fn push(&self, record: OutgoingRecord) -> SyncResult<RecordVersion> {
            if Self::take_one(&self.failing_pushes) {
                return Err(SyncError::TransientTransport("injected push failure".into()));
            }
            if Self::take_one(&self.refusing_pushes) {
                return Err(SyncError::Transport("push refused".into()));
            }
            let version = self.remote.lock().write(
                Some(self.device),
                record.record_type,
                record.record_name.clone(),
                record.payload,
                record.parent,
                record.deleted,
            );
            debug!(device = %self.device, record = %record.record_name, %version, "remote accepted push");
            Ok(version)
        }

        async fn pull(&self) -> SyncResult<Vec<IncomingRecord>> {
            if Self::take_one(&self.failing_pulls) {
                return Err(SyncError::TransientTransport("injected pull failure".into()));
            }
            let mut changes: Vec<IncomingRecord> = self
                .inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();

            let state = self.remote.lock();
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            changes.extend(
                state.log[*cursor..]
                    .iter()
                    .filter(|entry| entry.author != Some(self.device))
                    .map(|entry| entry.record.clone()),
            );
            *cursor = state.log.len();
            Ok(changes)
        }

        async fn share(
            &self,
            root: &RecordName,
            metadata: ShareMetadata,
        ) -> SyncResult<InvitationHandle> {
            let mut state = self.remote.lock();
            match state.records.get(root) {
                Some(record) if !record.deleted => {}
                _ => return Err(SyncError::Transport(format!("{root} is not on the remote"))),
            }
            let handle = state
                .shares
                .entry(root.clone())
                .or_insert_with(|| {
                    let share_id = uuid::Uuid::now_v7().to_string();
                    InvitationHandle {
                        url: format!("memory://share/{share_id}"),
                        share_id,
                        created_at: Utc::now(),
                    }
                })
                .clone();
            debug!(root = %root, title = %metadata.title, share = %handle.share_id, "remote share ready");
            Ok(handle)
        }
    }
}
