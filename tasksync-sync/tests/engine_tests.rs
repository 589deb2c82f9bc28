//! Tests for the sync engine: push, pull, conflicts, deletions and deferral.

mod common;

use chrono::{Duration, Utc};
use common::{group_name, task_name, Device};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::time::Duration as StdDuration;
use tasksync_model::{Color, GroupDraft, PrivateTaskState, Row, TableRecord, Task, TaskDraft};
use tasksync_storage::{LocalStore, WriteOrigin};
use tasksync_sync::transport::memory::MemoryRemote;
use tasksync_sync::{pending, ApplyOutcome, IncomingRecord, SyncError, SyncState};
use tasksync_types::{EntityId, RecordName, RecordType, RecordVersion};

fn task_record(task: &Task, version: u64) -> IncomingRecord {
    IncomingRecord {
        record_type: RecordType::new(Task::TABLE),
        record_name: task_name(task),
        payload: task.to_row().unwrap(),
        parent: task.group_id.map(|g| RecordName::new("user_groups", g)),
        deleted: false,
        version: RecordVersion::new(version),
    }
}

// ── Round trip ──────────────────────────────────────────────────

#[tokio::test]
async fn shared_rows_reach_second_device_without_private_state() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let family = alice.group("Family");
    let milk = alice.task(TaskDraft::new("Buy milk").in_group(family.id));
    alice.private.toggle_completion(milk.id).unwrap();

    let pushed = alice.engine.sync_once().await.unwrap();
    assert_eq!(pushed.push.pushed, vec![group_name(&family), task_name(&milk)]);
    assert!(pushed.push.is_clean());

    let pulled = bob.engine.sync_once().await.unwrap();
    assert_eq!(pulled.pull.applied(), 2);

    assert_eq!(bob.groups.get(family.id).unwrap(), Some(family.clone()));
    let on_bob = bob.tasks.get(milk.id).unwrap().unwrap();
    assert_eq!(on_bob, milk);
    assert_eq!(on_bob.group_id, Some(family.id));

    // Bob has a fresh shadow; Alice keeps her completion.
    assert_eq!(
        bob.private.get(milk.id).unwrap(),
        Some(PrivateTaskState::new(milk.id))
    );
    assert!(alice.private.get(milk.id).unwrap().unwrap().is_completed());

    let remote_task = remote.record(&task_name(&milk)).unwrap();
    assert!(!remote_task.payload.contains_key("completion_date"));
    assert_eq!(
        remote_task.parent,
        Some(RecordName::new("user_groups", family.id))
    );
}

#[tokio::test]
async fn pushed_rows_become_synced_and_clean() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let family = alice.group("Family");

    let status = alice.engine.status(&RecordType::new("user_groups"), family.id).unwrap().unwrap();
    assert_eq!(status.state, SyncState::LocalOnly);
    assert_eq!(alice.engine.pending_count().unwrap(), 1);

    alice.engine.push_pending().await.unwrap();

    let status = alice.engine.status(&RecordType::new("user_groups"), family.id).unwrap().unwrap();
    assert_eq!(status.state, SyncState::Synced);
    assert!(status.last_known_remote_version.is_some());
    assert!(!status.is_dirty());
    assert_eq!(alice.engine.pending_count().unwrap(), 0);
}

#[tokio::test]
async fn local_update_is_pushed_again() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let family = alice.group("Family");
    alice.engine.sync_once().await.unwrap();
    bob.engine.sync_once().await.unwrap();

    alice
        .groups
        .update(family.id, GroupDraft::new("Family & friends"))
        .unwrap();
    assert_eq!(alice.engine.pending_count().unwrap(), 1);
    let report = alice.engine.push_pending().await.unwrap();
    assert_eq!(report.pushed, vec![group_name(&family)]);

    bob.engine.sync_once().await.unwrap();
    assert_eq!(
        bob.groups.get(family.id).unwrap().unwrap().name,
        "Family & friends"
    );
}

#[tokio::test]
async fn pulled_rows_are_not_pushed_back() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    alice.group("Family");
    alice.engine.sync_once().await.unwrap();
    let report = bob.engine.sync_once().await.unwrap();

    assert_eq!(report.pull.applied(), 1);
    assert_eq!(bob.engine.pending_count().unwrap(), 0);
    let again = bob.engine.push_pending().await.unwrap();
    assert!(again.pushed.is_empty());
}

// ── Ordering ────────────────────────────────────────────────────

#[tokio::test]
async fn parents_are_pushed_before_children() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");

    let family = alice.group("Family");
    let milk = alice.task(TaskDraft::new("Buy milk").in_group(family.id));
    let eggs = alice.task(TaskDraft::new("Buy eggs"));

    let report = alice.engine.push_pending().await.unwrap();
    assert_eq!(report.pushed[0], group_name(&family));
    assert!(report.pushed.contains(&task_name(&milk)));
    assert!(report.pushed.contains(&task_name(&eggs)));
}

#[tokio::test]
async fn child_waits_for_parent_within_one_pull() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");

    let family = GroupDraft::new("Family").into_group(EntityId::new());
    let milk = TaskDraft::new("Buy milk").in_group(family.id).into_task(EntityId::new());
    let family_name = group_name(&family);

    // The child is published first.
    remote.publish(task_name(&milk), milk.to_row().unwrap(), Some(family_name.clone()), false);
    remote.publish(family_name.clone(), family.to_row().unwrap(), None, false);

    let report = bob.engine.pull().await.unwrap();
    assert_eq!(report.deferred(), 1);
    assert_eq!(report.outcome_of(&task_name(&milk)), Some(&ApplyOutcome::Applied));
    assert_eq!(bob.tasks.get(milk.id).unwrap(), Some(milk.clone()));
    assert_eq!(bob.engine.deferred_count().unwrap(), 0);
    assert!(bob.private.get(milk.id).unwrap().is_some());
}

#[tokio::test]
async fn child_waits_for_parent_across_pulls() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");

    let family = GroupDraft::new("Family").into_group(EntityId::new());
    let milk = TaskDraft::new("Buy milk").in_group(family.id).into_task(EntityId::new());
    let family_name = group_name(&family);

    remote.publish(task_name(&milk), milk.to_row().unwrap(), Some(family_name.clone()), false);
    let first = bob.engine.pull().await.unwrap();
    assert_eq!(
        first.outcome_of(&task_name(&milk)),
        Some(&ApplyOutcome::Deferred { parent: family_name.clone() })
    );
    assert_eq!(bob.tasks.get(milk.id).unwrap(), None);
    assert_eq!(bob.engine.deferred_count().unwrap(), 1);

    remote.publish(family_name, family.to_row().unwrap(), None, false);
    let second = bob.engine.pull().await.unwrap();
    assert_eq!(second.applied(), 2);
    assert_eq!(bob.tasks.get(milk.id).unwrap().unwrap().group_id, Some(family.id));
    assert_eq!(bob.engine.deferred_count().unwrap(), 0);
}

#[tokio::test]
async fn parked_record_is_replaced_only_by_newer_version() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");

    let group_id = EntityId::new();
    let mut milk = TaskDraft::new("Buy milk").in_group(group_id).into_task(EntityId::new());
    bob.transport.deliver(task_record(&milk, 5));
    milk.title = "Buy oat milk".into();
    bob.transport.deliver(task_record(&milk, 3));
    bob.engine.pull().await.unwrap();

    let parked = bob
        .store
        .read(|tx| pending::parked_version(tx, &task_name(&milk)))
        .unwrap();
    assert_eq!(parked, Some(RecordVersion::new(5)));
    let all = bob.store.read(|tx| pending::all(tx)).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].record.payload["title"], Value::from("Buy milk"));
}

// ── Conflicts ───────────────────────────────────────────────────

#[tokio::test]
async fn stale_version_is_dropped() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let milk = alice.task(TaskDraft::new("Buy milk"));
    alice.engine.sync_once().await.unwrap();
    bob.engine.sync_once().await.unwrap();
    let known = bob
        .engine
        .status(&RecordType::new(Task::TABLE), milk.id)
        .unwrap()
        .unwrap()
        .last_known_remote_version
        .unwrap();

    let mut replay = milk.clone();
    replay.title = "Old title".into();
    bob.transport.deliver(task_record(&replay, known.value()));

    let report = bob.engine.pull().await.unwrap();
    assert_eq!(
        report.outcome_of(&task_name(&milk)),
        Some(&ApplyOutcome::ConflictDropped)
    );
    assert_eq!(bob.tasks.get(milk.id).unwrap().unwrap().title, "Buy milk");
}

#[tokio::test]
async fn newer_remote_version_replaces_unpushed_local_change() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let milk = alice.task(TaskDraft::new("Buy milk"));
    alice.engine.sync_once().await.unwrap();
    bob.engine.sync_once().await.unwrap();

    bob.tasks
        .update(milk.id, TaskDraft::from(&milk).with_content("bob's note"))
        .unwrap();
    alice
        .tasks
        .update(milk.id, TaskDraft::from(&milk).with_content("alice's note"))
        .unwrap();
    alice.engine.push_pending().await.unwrap();

    let report = bob.engine.pull().await.unwrap();
    assert_eq!(report.outcome_of(&task_name(&milk)), Some(&ApplyOutcome::Resolved));
    assert_eq!(bob.tasks.get(milk.id).unwrap().unwrap().content, "alice's note");

    let status = bob
        .engine
        .status(&RecordType::new(Task::TABLE), milk.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.state, SyncState::Synced);
    assert!(!status.is_dirty());
    assert!(bob.engine.push_pending().await.unwrap().pushed.is_empty());
}

#[tokio::test]
async fn pending_local_deletion_wins_over_remote_edit() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let milk = alice.task(TaskDraft::new("Buy milk"));
    alice.engine.sync_once().await.unwrap();
    bob.engine.sync_once().await.unwrap();

    bob.tasks.delete(milk.id).unwrap();
    alice
        .tasks
        .update(milk.id, TaskDraft::from(&milk).with_content("edit"))
        .unwrap();
    alice.engine.push_pending().await.unwrap();

    let report = bob.engine.pull().await.unwrap();
    assert_eq!(
        report.outcome_of(&task_name(&milk)),
        Some(&ApplyOutcome::ConflictDropped)
    );
    assert_eq!(bob.tasks.get(milk.id).unwrap(), None);

    let push = bob.engine.push_pending().await.unwrap();
    assert_eq!(push.deleted, vec![task_name(&milk)]);
    assert!(remote.record(&task_name(&milk)).unwrap().deleted);

    alice.engine.pull().await.unwrap();
    assert_eq!(alice.tasks.get(milk.id).unwrap(), None);
}

// ── Deletion ────────────────────────────────────────────────────

#[tokio::test]
async fn local_delete_propagates() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let milk = alice.task(TaskDraft::new("Buy milk"));
    alice.engine.sync_once().await.unwrap();
    bob.engine.sync_once().await.unwrap();
    assert!(bob.private.get(milk.id).unwrap().is_some());

    alice.tasks.delete(milk.id).unwrap();
    let status = alice
        .engine
        .status(&RecordType::new(Task::TABLE), milk.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.state, SyncState::Deleted);

    let report = alice.engine.sync_once().await.unwrap();
    assert_eq!(report.push.deleted, vec![task_name(&milk)]);
    assert!(remote.live_records().is_empty());
    assert_eq!(
        alice.engine.status(&RecordType::new(Task::TABLE), milk.id).unwrap(),
        None
    );

    let pulled = bob.engine.sync_once().await.unwrap();
    assert_eq!(pulled.pull.outcome_of(&task_name(&milk)), Some(&ApplyOutcome::Deleted));
    assert_eq!(bob.tasks.get(milk.id).unwrap(), None);
    assert_eq!(bob.private.get(milk.id).unwrap(), None);
    assert_eq!(
        bob.engine.status(&RecordType::new(Task::TABLE), milk.id).unwrap(),
        None
    );
}

#[tokio::test]
async fn deleting_unpushed_row_leaves_nothing_to_push() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");

    let milk = alice.task(TaskDraft::new("Buy milk"));
    alice.tasks.delete(milk.id).unwrap();

    assert_eq!(alice.engine.pending_count().unwrap(), 0);
    let report = alice.engine.push_pending().await.unwrap();
    assert!(report.pushed.is_empty() && report.deleted.is_empty());
    assert!(remote.record(&task_name(&milk)).is_none());
}

#[tokio::test]
async fn remote_group_deletion_detaches_tasks() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let family = alice.group("Family");
    let milk = alice.task(TaskDraft::new("Buy milk").in_group(family.id));
    alice.engine.sync_once().await.unwrap();
    bob.engine.sync_once().await.unwrap();

    alice.groups.delete(family.id).unwrap();
    assert_eq!(alice.tasks.get(milk.id).unwrap().unwrap().group_id, None);
    let report = alice.engine.push_pending().await.unwrap();
    assert_eq!(report.pushed, vec![task_name(&milk)]);
    assert_eq!(report.deleted, vec![group_name(&family)]);

    let remote_task = remote.record(&task_name(&milk)).unwrap();
    assert_eq!(remote_task.payload["group_id"], Value::Null);
    assert_eq!(remote_task.parent, None);
    assert_eq!(alice.engine.pending_count().unwrap(), 0);

    bob.engine.pull().await.unwrap();
    assert_eq!(bob.groups.get(family.id).unwrap(), None);
    let on_bob = bob.tasks.get(milk.id).unwrap().unwrap();
    assert_eq!(on_bob.group_id, None);
    let status = bob
        .engine
        .status(&RecordType::new(Task::TABLE), milk.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.parent, None);
}

#[tokio::test]
async fn deletion_of_parent_discards_parked_children() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");

    let group_id = EntityId::new();
    let milk = TaskDraft::new("Buy milk").in_group(group_id).into_task(EntityId::new());
    bob.transport.deliver(task_record(&milk, 1));
    bob.engine.pull().await.unwrap();
    assert_eq!(bob.engine.deferred_count().unwrap(), 1);

    remote.publish(RecordName::new("user_groups", group_id), Row::new(), None, true);
    let report = bob.engine.pull().await.unwrap();
    assert_eq!(
        report.outcome_of(&RecordName::new("user_groups", group_id)),
        Some(&ApplyOutcome::Deleted)
    );
    assert_eq!(bob.engine.deferred_count().unwrap(), 0);
    assert_eq!(bob.tasks.get(milk.id).unwrap(), None);
}

// ── Malformed payloads ──────────────────────────────────────────

#[tokio::test]
async fn malformed_pulled_row_fails_alone() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");

    let good = TaskDraft::new("Buy milk").into_task(EntityId::new());
    let bad = TaskDraft::new("Someday").into_task(EntityId::new());
    let mut payload = bad.to_row().unwrap();
    payload.insert("start_date".into(), Value::String("tomorrow".into()));
    remote.publish(task_name(&bad), payload, None, false);
    remote.publish(task_name(&good), good.to_row().unwrap(), None, false);

    let report = bob.engine.pull().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, task_name(&bad));
    assert_eq!(report.outcome_of(&task_name(&bad)), None);
    assert_eq!(report.outcome_of(&task_name(&good)), Some(&ApplyOutcome::Applied));

    assert_eq!(bob.tasks.list().unwrap(), vec![good.clone()]);
    assert_eq!(bob.tasks.with_private_data().unwrap().len(), 1);
    assert_eq!(
        bob.engine.status(&RecordType::new(Task::TABLE), bad.id).unwrap(),
        None
    );
}

#[tokio::test]
async fn malformed_deferred_child_does_not_undo_its_parent() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");

    let group_id = EntityId::new();
    let milk = TaskDraft::new("Buy milk").in_group(group_id).into_task(EntityId::new());
    let eggs = TaskDraft::new("Eggs").in_group(group_id).into_task(EntityId::new());
    let mut broken = task_record(&eggs, 2);
    broken
        .payload
        .insert("end_date".into(), Value::String("never".into()));
    bob.transport.deliver(task_record(&milk, 1));
    bob.transport.deliver(broken);
    bob.engine.pull().await.unwrap();
    assert_eq!(bob.engine.deferred_count().unwrap(), 2);

    let family = GroupDraft::new("Family").into_group(group_id);
    remote.publish(
        RecordName::new("user_groups", group_id),
        family.to_row().unwrap(),
        None,
        false,
    );
    let report = bob.engine.pull().await.unwrap();

    assert_eq!(
        report.outcome_of(&RecordName::new("user_groups", group_id)),
        Some(&ApplyOutcome::Applied)
    );
    assert_eq!(report.outcome_of(&task_name(&milk)), Some(&ApplyOutcome::Applied));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, task_name(&eggs));

    assert_eq!(bob.groups.get(group_id).unwrap(), Some(family));
    assert_eq!(bob.tasks.list().unwrap(), vec![milk]);
    assert_eq!(bob.engine.deferred_count().unwrap(), 0);
}

// ── Retry and failure ───────────────────────────────────────────

#[tokio::test]
async fn transient_push_failures_are_retried() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let family = alice.group("Family");

    alice.transport.fail_next_pushes(2);
    let report = alice.engine.push_pending().await.unwrap();

    assert_eq!(report.pushed, vec![group_name(&family)]);
    assert!(remote.record(&group_name(&family)).is_some());
}

#[tokio::test]
async fn exhausted_retries_leave_record_pushing() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let family = alice.group("Family");

    alice.transport.fail_next_pushes(10);
    let report = alice.engine.push_pending().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    let status = alice
        .engine
        .status(&RecordType::new("user_groups"), family.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.state, SyncState::Pushing);
    assert_eq!(status.push_attempts, 1);
    assert!(status.last_error.unwrap().contains("injected push failure"));
    assert!(remote.record(&group_name(&family)).is_none());

    // The transport recovers; the next round pushes the record.
    alice.transport.fail_next_pushes(0);
    let retry = alice.engine.push_pending().await.unwrap();
    assert_eq!(retry.pushed, vec![group_name(&family)]);
}

#[tokio::test]
async fn refused_parent_holds_back_children() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let family = alice.group("Family");
    let milk = alice.task(TaskDraft::new("Buy milk").in_group(family.id));
    let eggs = alice.task(TaskDraft::new("Buy eggs"));

    alice.transport.refuse_next_pushes(1);
    let report = alice.engine.push_pending().await.unwrap();

    assert_eq!(report.failed[0].0, group_name(&family));
    assert_eq!(report.held_back, vec![task_name(&milk)]);
    assert_eq!(report.pushed, vec![task_name(&eggs)]);
    assert!(!report.is_clean());

    let next = alice.engine.push_pending().await.unwrap();
    assert_eq!(next.pushed, vec![group_name(&family), task_name(&milk)]);
}

#[tokio::test]
async fn transient_pull_failure_is_retried() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");
    alice.group("Family");
    alice.engine.sync_once().await.unwrap();

    bob.transport.fail_next_pulls(1);
    let report = bob.engine.pull().await.unwrap();
    assert_eq!(report.applied(), 1);
}

// ── Filtering ───────────────────────────────────────────────────

#[tokio::test]
async fn pulled_private_record_is_ignored() {
    let remote = MemoryRemote::new();
    let alice = Device::new(&remote, "alice");
    let bob = Device::new(&remote, "bob");

    let milk = alice.task(TaskDraft::new("Buy milk"));
    alice.engine.sync_once().await.unwrap();
    bob.engine.sync_once().await.unwrap();

    let leaked = PrivateTaskState {
        task_id: milk.id,
        completion_date: Some(Utc::now()),
    };
    let name = RecordName::new(PrivateTaskState::TABLE, milk.id);
    bob.transport.deliver(IncomingRecord {
        record_type: RecordType::new(PrivateTaskState::TABLE),
        record_name: name.clone(),
        payload: leaked.to_row().unwrap(),
        parent: None,
        deleted: false,
        version: RecordVersion::new(99),
    });

    let report = bob.engine.pull().await.unwrap();
    assert_eq!(report.outcome_of(&name), Some(&ApplyOutcome::Ignored));
    assert!(!bob.private.get(milk.id).unwrap().unwrap().is_completed());
}

#[tokio::test]
async fn missing_payload_columns_restore_defaults() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");
    let id = EntityId::new();
    let mut payload = Row::new();
    payload.insert("description".into(), Value::from("Everyone at home"));
    payload.insert("unknown_field".into(), Value::from(1));

    remote.publish(RecordName::new("user_groups", id), payload, None, false);
    let report = bob.engine.pull().await.unwrap();
    assert_eq!(report.applied(), 1);

    let group = bob.groups.get(id).unwrap().unwrap();
    assert_eq!(group.name, "UNKNOWN");
    assert_eq!(group.description.as_deref(), Some("Everyone at home"));
    assert_eq!(group.color, Color::DEFAULT);
}

// ── Orphans ─────────────────────────────────────────────────────

#[tokio::test]
async fn orphaned_records_are_reported_after_retention() {
    let remote = MemoryRemote::new();
    let config = tasksync_sync::SyncConfig {
        orphan_retention_secs: 0,
        ..common::fast_config("bob")
    };
    let bob = Device::with_config(&remote, config);

    let group_id = EntityId::new();
    let milk = TaskDraft::new("Buy milk").in_group(group_id).into_task(EntityId::new());
    bob.transport.deliver(task_record(&milk, 1));

    let report = bob.engine.pull().await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    let mut orphans = report.orphans;
    orphans.extend(bob.engine.expire_orphans().unwrap());

    assert_eq!(orphans.len(), 1);
    match &orphans[0] {
        SyncError::OrphanedReference { record, parent } => {
            assert_eq!(record, &task_name(&milk));
            assert_eq!(parent, &RecordName::new("user_groups", group_id));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bob.engine.deferred_count().unwrap(), 0);
}

#[tokio::test]
async fn parked_records_within_retention_are_kept() {
    let remote = MemoryRemote::new();
    let bob = Device::new(&remote, "bob");
    let milk = TaskDraft::new("Buy milk")
        .in_group(EntityId::new())
        .into_task(EntityId::new());
    bob.transport.deliver(task_record(&milk, 1));

    let report = bob.engine.pull().await.unwrap();
    assert!(report.orphans.is_empty());
    assert_eq!(bob.engine.deferred_count().unwrap(), 1);

    let expired = bob
        .store
        .execute(WriteOrigin::Remote, |tx| {
            pending::expire(tx, Utc::now() + Duration::seconds(1))
        })
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].record.record_name, task_name(&milk));
}

// ── Adoption ────────────────────────────────────────────────────

#[tokio::test]
async fn rows_written_before_sync_are_adopted() {
    let remote = MemoryRemote::new();
    let store = std::sync::Arc::new(LocalStore::open_in_memory().unwrap());
    let groups = tasksync_storage::GroupRepository::new(store.clone());
    let tasks = tasksync_storage::TaskRepository::new(store.clone());
    let family = groups.create(GroupDraft::new("Family")).unwrap();
    let milk = tasks.create(TaskDraft::new("Buy milk").in_group(family.id)).unwrap();

    let alice = Device::on_store(&remote, store, common::fast_config("alice"));
    assert_eq!(alice.engine.pending_count().unwrap(), 2);
    let status = alice
        .engine
        .status(&RecordType::new(Task::TABLE), milk.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.parent, Some(group_name(&family)));

    let report = alice.engine.push_pending().await.unwrap();
    assert_eq!(report.pushed.len(), 2);
}
