//! Typed entry points used by the presentation layer.
//!
//! Every write is one [`LocalStore::execute`] transaction with
//! [`WriteOrigin::Local`], so registered triggers (shadow rows, sync
//! tracking) run as part of the same unit of work.

use crate::error::{StorageError, StorageResult};
use crate::observe::Observation;
use crate::store::{LocalStore, StoreTx, WriteOrigin};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tasksync_model::{
    Group, GroupDraft, PrivateTaskState, TableRecord, Task, TaskDraft, TaskWithPrivateData,
};
use tasksync_types::EntityId;
use tracing::info;

// ── Groups ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GroupRepository {
    store: Arc<LocalStore>,
}

impl GroupRepository {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Creates a group under a fresh identity.
    pub fn create(&self, draft: GroupDraft) -> StorageResult<Group> {
        let group = draft.into_group(EntityId::new());
        self.store
            .execute(WriteOrigin::Local, |tx| tx.insert_record(&group))?;
        info!(id = %group.id, name = %group.name, "created group");
        Ok(group)
    }

    /// Replaces every column of an existing group.
    pub fn update(&self, id: EntityId, draft: GroupDraft) -> StorageResult<Group> {
        let group = draft.into_group(id);
        let found = self
            .store
            .execute(WriteOrigin::Local, |tx| tx.update_record(&group))?;
        if !found {
            return Err(not_found::<Group>(id));
        }
        Ok(group)
    }

    /// Deletes a group. Its tasks stay, with `group_id` cleared.
    pub fn delete(&self, id: EntityId) -> StorageResult<bool> {
        self.store
            .execute(WriteOrigin::Local, |tx| tx.delete(Group::TABLE, id))
    }

    pub fn get(&self, id: EntityId) -> StorageResult<Option<Group>> {
        self.store.read(|tx| tx.get(id))
    }

    /// All groups, ordered by name.
    pub fn list(&self) -> StorageResult<Vec<Group>> {
        self.store.read(list_groups)
    }

    pub fn observe(&self) -> Observation<Vec<Group>> {
        self.store.observe(&[Group::TABLE], list_groups)
    }
}

fn list_groups(tx: &StoreTx<'_>) -> StorageResult<Vec<Group>> {
    let mut groups: Vec<Group> = tx.all()?;
    groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Ok(groups)
}

// ── Tasks ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<LocalStore>,
}

impl TaskRepository {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Creates a task. Its private state exists once this returns.
    pub fn create(&self, draft: TaskDraft) -> StorageResult<Task> {
        let task = draft.into_task(EntityId::new());
        self.store
            .execute(WriteOrigin::Local, |tx| tx.insert_record(&task))?;
        info!(id = %task.id, title = %task.title, "created task");
        Ok(task)
    }

    pub fn update(&self, id: EntityId, draft: TaskDraft) -> StorageResult<Task> {
        let task = draft.into_task(id);
        let found = self
            .store
            .execute(WriteOrigin::Local, |tx| tx.update_record(&task))?;
        if !found {
            return Err(not_found::<Task>(id));
        }
        Ok(task)
    }

    /// Deletes a task together with its private state.
    pub fn delete(&self, id: EntityId) -> StorageResult<bool> {
        self.store
            .execute(WriteOrigin::Local, |tx| tx.delete(Task::TABLE, id))
    }

    pub fn get(&self, id: EntityId) -> StorageResult<Option<Task>> {
        self.store.read(|tx| tx.get(id))
    }

    /// All tasks ordered by start date.
    pub fn list(&self) -> StorageResult<Vec<Task>> {
        self.store.read(tasks_by_start_date)
    }

    /// Tasks of one group ordered by start date.
    pub fn in_group(&self, group_id: EntityId) -> StorageResult<Vec<Task>> {
        self.store.read(|tx| {
            let rows = tx.select_where(
                Task::TABLE,
                "group_id",
                &Value::String(group_id.to_string()),
            )?;
            let mut tasks = rows
                .into_iter()
                .map(Task::from_row)
                .collect::<Result<Vec<_>, _>>()?;
            sort_by_start(&mut tasks);
            Ok(tasks)
        })
    }

    /// All tasks joined with their private state, ordered by start date.
    pub fn with_private_data(&self) -> StorageResult<Vec<TaskWithPrivateData>> {
        self.store.read(tasks_with_private_data)
    }

    pub fn observe(&self) -> Observation<Vec<TaskWithPrivateData>> {
        self.store.observe(
            &[Task::TABLE, PrivateTaskState::TABLE],
            tasks_with_private_data,
        )
    }
}

/// Tasks ordered by start date, ties broken by identity.
///
/// Ordering happens on parsed dates; the stored RFC 3339 text does not sort
/// correctly once fractional seconds differ in width.
pub fn tasks_by_start_date(tx: &StoreTx<'_>) -> StorageResult<Vec<Task>> {
    let mut tasks: Vec<Task> = tx.all()?;
    sort_by_start(&mut tasks);
    Ok(tasks)
}

/// Every task with its shadow row.
pub fn tasks_with_private_data(tx: &StoreTx<'_>) -> StorageResult<Vec<TaskWithPrivateData>> {
    tasks_by_start_date(tx)?
        .into_iter()
        .map(|task| {
            let private = tx.get::<PrivateTaskState>(task.id)?;
            Ok(TaskWithPrivateData { task, private })
        })
        .collect()
}

fn sort_by_start(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
}

// ── Private state ────────────────────────────────────────────────

#[derive(Clone)]
pub struct PrivateTaskRepository {
    store: Arc<LocalStore>,
}

impl PrivateTaskRepository {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, task_id: EntityId) -> StorageResult<Option<PrivateTaskState>> {
        self.store.read(|tx| tx.get(task_id))
    }

    /// Sets or clears the completion date of a task on this device.
    pub fn set_completion(
        &self,
        task_id: EntityId,
        completion_date: Option<DateTime<Utc>>,
    ) -> StorageResult<PrivateTaskState> {
        let state = PrivateTaskState {
            task_id,
            completion_date,
        };
        let found = self
            .store
            .execute(WriteOrigin::Local, |tx| tx.update_record(&state))?;
        if !found {
            return Err(not_found::<PrivateTaskState>(task_id));
        }
        Ok(state)
    }

    /// Marks an open task completed now, or reopens a completed one.
    pub fn toggle_completion(&self, task_id: EntityId) -> StorageResult<PrivateTaskState> {
        let state = self.store.execute(WriteOrigin::Local, |tx| -> StorageResult<_> {
            let current: PrivateTaskState = tx
                .get(task_id)?
                .ok_or_else(|| not_found::<PrivateTaskState>(task_id))?;
            let next = PrivateTaskState {
                task_id,
                completion_date: match current.completion_date {
                    Some(_) => None,
                    None => Some(Utc::now()),
                },
            };
            tx.update_record(&next)?;
            Ok(next)
        })?;
        info!(task = %task_id, completed = state.is_completed(), "toggled completion");
        Ok(state)
    }
}

fn not_found<R: TableRecord>(id: EntityId) -> StorageError {
    StorageError::NotFound(format!("{} {id}", R::TABLE))
}
