//! Tests for sharing a group with the tasks linked under it.

mod common;

use common::{group_name, task_name, Device};
use pretty_assertions::assert_eq;
use tasksync_model::TaskDraft;
use tasksync_sync::transport::memory::MemoryRemote;
use tasksync_sync::{share_title, SharingManager, SyncError, SyncState};
use tasksync_types::{EntityId, RecordType};

#[test]
fn title_names_the_group() {
    assert_eq!(share_title("Family"), "Join 'Family'!");
}

#[tokio::test]
async fn sharing_pushes_a_local_only_group_first() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let sharing = SharingManager::new(alice.engine.clone());
    let family = alice.group("Family");

    let invitation = sharing.create_share(family.id).await.unwrap();

    assert_eq!(invitation.root, group_name(&family));
    assert_eq!(invitation.title, "Join 'Family'!");
    assert!(invitation.url.starts_with("memory://share/"));
    assert!(remote.record(&group_name(&family)).is_some());
    assert_eq!(
        remote.share_of(&group_name(&family)).unwrap().share_id,
        invitation.share_id
    );
    let status = alice
        .engine
        .status(&RecordType::new("user_groups"), family.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.state, SyncState::Synced);
}

#[tokio::test]
async fn sharing_twice_returns_same_invitation() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let sharing = SharingManager::new(alice.engine.clone());
    let family = alice.group("Family");

    let first = sharing.create_share(family.id).await.unwrap();
    let second = sharing.create_share(family.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(sharing.share_for(family.id).unwrap(), Some(first));
}

#[tokio::test]
async fn sharing_unknown_group_fails() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let sharing = SharingManager::new(alice.engine.clone());

    let err = sharing.create_share(EntityId::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownRecord(_)));
}

#[tokio::test]
async fn sharing_fails_when_group_cannot_be_pushed() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let sharing = SharingManager::new(alice.engine.clone());
    let family = alice.group("Family");

    alice.transport.refuse_next_pushes(1);
    let err = sharing.create_share(family.id).await.unwrap_err();

    assert!(matches!(err, SyncError::Transport(_)));
    assert_eq!(sharing.share_for(family.id).unwrap(), None);
}

#[tokio::test]
async fn members_are_root_and_linked_tasks() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let sharing = SharingManager::new(alice.engine.clone());
    let family = alice.group("Family");
    let milk = alice.task(TaskDraft::new("Buy milk").in_group(family.id));
    let eggs = alice.task(TaskDraft::new("Buy eggs").in_group(family.id));
    alice.task(TaskDraft::new("File taxes"));

    let invitation = sharing.create_share(family.id).await.unwrap();
    let members = sharing.members(&invitation).unwrap();

    assert_eq!(
        members,
        vec![group_name(&family), task_name(&milk), task_name(&eggs)]
    );
}

#[tokio::test]
async fn deleting_shared_group_forgets_share() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let sharing = SharingManager::new(alice.engine.clone());
    let family = alice.group("Family");
    sharing.create_share(family.id).await.unwrap();

    alice.groups.delete(family.id).unwrap();
    assert_eq!(sharing.share_for(family.id).unwrap(), None);

    alice.engine.push_pending().await.unwrap();
    assert_eq!(remote.share_of(&group_name(&family)), None);
}

#[tokio::test]
async fn remote_deletion_of_shared_group_forgets_share() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");
    let sharing = SharingManager::new(alice.engine.clone());
    let family = alice.group("Family");
    sharing.create_share(family.id).await.unwrap();

    bob.engine.sync_once().await.unwrap();
    bob.groups.delete(family.id).unwrap();
    bob.engine.sync_once().await.unwrap();

    alice.engine.pull().await.unwrap();
    assert_eq!(alice.groups.get(family.id).unwrap(), None);
    assert_eq!(sharing.share_for(family.id).unwrap(), None);
}
