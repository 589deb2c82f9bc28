//! Shared test helpers for sync tests: devices wired to one in-memory remote.

#![allow(dead_code)]

use std::sync::Arc;
use tasksync_model::{Group, GroupDraft, TableRecord, Task, TaskDraft};
use tasksync_storage::{GroupRepository, LocalStore, PrivateTaskRepository, TaskRepository};
use tasksync_sync::transport::memory::{MemoryRemote, MemoryTransport};
use tasksync_sync::{RemoteTransport, SyncConfig, SyncContext, SyncEngine};
use tasksync_types::{DeviceId, RecordName};

/// Retries without real waiting.
pub fn fast_config(name: &str) -> SyncConfig {
    SyncConfig {
        device_name: name.to_string(),
        base_backoff_ms: 1,
        max_backoff_ms: 5,
        transport_timeout_ms: 2_000,
        ..SyncConfig::default()
    }
}

/// One device: its own store, its own connection to the shared remote.
pub struct Device {
    pub store: Arc<LocalStore>,
    pub transport: Arc<MemoryTransport>,
    pub engine: Arc<SyncEngine>,
    pub groups: GroupRepository,
    pub tasks: TaskRepository,
    pub private: PrivateTaskRepository,
}

impl Device {
    pub fn new(remote: &MemoryRemote, name: &str) -> Self {
        Self::with_config(remote, fast_config(name))
    }

    pub fn with_config(remote: &MemoryRemote, config: SyncConfig) -> Self {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        Self::on_store(remote, store, config)
    }

    /// Attaches sync to an existing store.
    pub fn on_store(remote: &MemoryRemote, store: Arc<LocalStore>, config: SyncConfig) -> Self {
        let transport = Arc::new(remote.connect(DeviceId::new()));
        let dyn_transport: Arc<dyn RemoteTransport> = transport.clone();
        let engine = SyncEngine::new(SyncContext::new(store.clone(), dyn_transport, config)).unwrap();
        Self {
            groups: GroupRepository::new(store.clone()),
            tasks: TaskRepository::new(store.clone()),
            private: PrivateTaskRepository::new(store.clone()),
            store,
            transport,
            engine: Arc::new(engine),
        }
    }

    pub fn group(&self, name: &str) -> Group {
        self.groups.create(GroupDraft::new(name)).unwrap()
    }

    pub fn task(&self, draft: TaskDraft) -> Task {
        self.tasks.create(draft).unwrap()
    }
}

pub fn group_name(group: &Group) -> RecordName {
    RecordName::new(Group::TABLE, group.id)
}

pub fn task_name(task: &Task) -> RecordName {
    RecordName::new(Task::TABLE, task.id)
}
