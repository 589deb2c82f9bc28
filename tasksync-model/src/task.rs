use crate::TableRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasksync_types::EntityId;

/// A task: a shared row optionally belonging to a [`Group`](crate::Group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub content: String,
    pub group_id: Option<EntityId>,
}

impl TableRecord for Task {
    const TABLE: &'static str = "tasks";

    fn key(&self) -> EntityId {
        self.id
    }
}

/// Values for a new task, or the full replacement set for an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub content: String,
    pub group_id: Option<EntityId>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn in_group(mut self, group_id: EntityId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn scheduled(mut self, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    pub fn into_task(self, id: EntityId) -> Task {
        Task {
            id,
            title: self.title,
            start_date: self.start_date,
            end_date: self.end_date,
            content: self.content,
            group_id: self.group_id,
        }
    }
}

impl Default for TaskDraft {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            title: String::new(),
            start_date: now,
            end_date: now,
            content: String::new(),
            group_id: None,
        }
    }
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            start_date: task.start_date,
            end_date: task.end_date,
            content: task.content.clone(),
            group_id: task.group_id,
        }
    }
}

/// Per-device state of a task. Never leaves the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateTaskState {
    pub task_id: EntityId,
    pub completion_date: Option<DateTime<Utc>>,
}

impl PrivateTaskState {
    /// The freshly materialized shadow of a task.
    pub fn new(task_id: EntityId) -> Self {
        Self {
            task_id,
            completion_date: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completion_date.is_some()
    }
}

impl TableRecord for PrivateTaskState {
    const TABLE: &'static str = "private_tasks";

    fn key(&self) -> EntityId {
        self.task_id
    }
}

/// A task joined with its private shadow.
///
/// `private` is `None` only if the shadow has not been materialized, which the
/// store prevents for every task inserted through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskWithPrivateData {
    pub task: Task,
    pub private: Option<PrivateTaskState>,
}

impl TaskWithPrivateData {
    pub fn is_completed(&self) -> bool {
        self.completion_date().is_some()
    }

    pub fn completion_date(&self) -> Option<DateTime<Utc>> {
        self.private.as_ref().and_then(|p| p.completion_date)
    }

    pub fn title(&self) -> &str {
        &self.task.title
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.task.start_date
    }

    pub fn end_date(&self) -> DateTime<Utc> {
        self.task.end_date
    }

    pub fn content(&self) -> &str {
        &self.task.content
    }
}
