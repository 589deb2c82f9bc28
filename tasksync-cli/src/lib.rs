//! Shared pieces of the `tasksync` binary: configuration loading, output
//! formatting and the two-device demo.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tasksync_model::{Group, GroupDraft, TaskDraft, TaskWithPrivateData};
use tasksync_storage::{
    GroupRepository, LocalStore, PrivateTaskRepository, StoreConfig, TaskRepository,
};
use tasksync_sync::transport::memory::MemoryRemote;
use tasksync_sync::{RemoteTransport, SharingManager, SyncConfig, SyncContext, SyncEngine};
use tasksync_types::DeviceId;
use tracing::info;

/// Contents of the optional JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

impl CliConfig {
    /// Reads `path`, or returns the defaults if no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

pub fn format_group(group: &Group) -> String {
    match &group.description {
        Some(description) => format!("{}  {} ({}) {}", group.id, group.name, description, group.color),
        None => format!("{}  {} {}", group.id, group.name, group.color),
    }
}

pub fn format_task(task: &TaskWithPrivateData) -> String {
    let mark = if task.is_completed() { "x" } else { " " };
    format!(
        "[{mark}] {}  {}  {} → {}",
        task.task.id,
        task.title(),
        task.start_date().format("%Y-%m-%d %H:%M"),
        task.end_date().format("%Y-%m-%d %H:%M"),
    )
}

/// What the demo observed on each device.
#[derive(Debug)]
pub struct DemoSummary {
    pub invitation_url: String,
    pub alice_tasks: Vec<TaskWithPrivateData>,
    pub bob_groups: Vec<Group>,
    pub bob_tasks: Vec<TaskWithPrivateData>,
}

struct DemoDevice {
    engine: Arc<SyncEngine>,
    groups: GroupRepository,
    tasks: TaskRepository,
    private: PrivateTaskRepository,
}

impl DemoDevice {
    fn open(remote: &MemoryRemote, name: &str, sync: &SyncConfig) -> Result<Self> {
        let store = Arc::new(LocalStore::open_in_memory()?);
        let transport: Arc<dyn RemoteTransport> = Arc::new(remote.connect(DeviceId::new()));
        let config = SyncConfig {
            device_name: name.to_string(),
            ..sync.clone()
        };
        let engine = Arc::new(SyncEngine::new(SyncContext::new(
            store.clone(),
            transport,
            config,
        ))?);
        Ok(Self {
            engine,
            groups: GroupRepository::new(store.clone()),
            tasks: TaskRepository::new(store.clone()),
            private: PrivateTaskRepository::new(store),
        })
    }
}

/// Two in-memory devices share a group through an in-memory remote.
///
/// Alice creates "Family" with "Buy milk", completes the task, shares the
/// group and syncs; Bob syncs and sees the task without Alice's completion.
pub async fn run_demo(sync: &SyncConfig) -> Result<DemoSummary> {
    let remote = MemoryRemote::new();
    let alice = DemoDevice::open(&remote, "alice", sync)?;
    let bob = DemoDevice::open(&remote, "bob", sync)?;

    let family = alice.groups.create(GroupDraft::new("Family"))?;
    let milk = alice
        .tasks
        .create(TaskDraft::new("Buy milk").in_group(family.id))?;
    alice.private.toggle_completion(milk.id)?;

    let invitation = SharingManager::new(alice.engine.clone())
        .create_share(family.id)
        .await?;
    info!(url = %invitation.url, "alice shared {}", family.name);
    alice.engine.sync_once().await?;

    let report = bob.engine.sync_once().await?;
    info!(applied = report.pull.applied(), "bob pulled");

    Ok(DemoSummary {
        invitation_url: invitation.url,
        alice_tasks: alice.tasks.with_private_data()?,
        bob_groups: bob.groups.list()?,
        bob_tasks: bob.tasks.with_private_data()?,
    })
}
