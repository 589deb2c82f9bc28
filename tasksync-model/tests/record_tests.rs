use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use tasksync_model::{
    Color, Group, GroupDraft, PrivateTaskState, TableRecord, Task, TaskDraft, TaskWithPrivateData,
};
use tasksync_types::EntityId;

// ── Color ────────────────────────────────────────────────────────

#[test]
fn color_components() {
    let c = Color::from_rgba(0x4A, 0x99, 0xEF, 0xFF);
    assert_eq!(c, Color::DEFAULT);
    assert_eq!((c.red(), c.green(), c.blue(), c.alpha()), (0x4A, 0x99, 0xEF, 0xFF));
}

#[test]
fn color_hex() {
    assert_eq!(Color::DEFAULT.to_string(), "#4A99EFFF");
    assert_eq!(Color::parse_hex("#4a99ef"), Some(Color::DEFAULT));
    assert_eq!("4A99EFFF".parse::<Color>().unwrap(), Color::DEFAULT);
    assert!(Color::parse_hex("#123").is_none());
    assert!(Color::parse_hex("zzzzzz").is_none());
}

// ── Rows ─────────────────────────────────────────────────────────

#[test]
fn group_row_uses_column_names() {
    let id = EntityId::new();
    let group = GroupDraft::new("Family").with_description("home").into_group(id);
    let row = group.to_row().unwrap();
    assert_eq!(row["id"], json!(id.to_string()));
    assert_eq!(row["name"], json!("Family"));
    assert_eq!(row["description"], json!("home"));
    assert_eq!(row["color"], json!(0x4A99_EFFFu32));
    assert_eq!(Group::from_row(row).unwrap(), group);
}

#[test]
fn empty_description_is_none() {
    let draft = GroupDraft::new("x").with_description("");
    assert_eq!(draft.description, None);
}

#[test]
fn task_row_dates_are_text() {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
    let task = TaskDraft::new("Buy milk").scheduled(start, end).into_task(EntityId::new());
    let row = task.to_row().unwrap();
    assert!(row["start_date"].as_str().unwrap().starts_with("2024-05-01T09:00:00"));
    assert_eq!(row["group_id"], json!(null));
    assert_eq!(Task::from_row(row).unwrap(), task);
}

#[test]
fn draft_roundtrip_from_existing() {
    let group_id = EntityId::new();
    let task = TaskDraft::new("t").in_group(group_id).with_content("c").into_task(EntityId::new());
    let draft = TaskDraft::from(&task);
    assert_eq!(draft.into_task(task.id), task);
}

#[test]
fn from_row_rejects_missing_columns() {
    let mut row = serde_json::Map::new();
    row.insert("id".into(), json!(EntityId::new().to_string()));
    assert!(Group::from_row(row).is_err());
}

// ── Private state ────────────────────────────────────────────────

#[test]
fn fresh_shadow_is_incomplete() {
    let state = PrivateTaskState::new(EntityId::new());
    assert!(!state.is_completed());
}

#[test]
fn joined_task_reports_completion() {
    let task = TaskDraft::new("t").into_task(EntityId::new());
    let done = Utc::now();
    let joined = TaskWithPrivateData {
        private: Some(PrivateTaskState {
            task_id: task.id,
            completion_date: Some(done),
        }),
        task,
    };
    assert!(joined.is_completed());
    assert_eq!(joined.completion_date(), Some(done));
    assert_eq!(joined.title(), "t");
}

#[test]
fn joined_task_without_shadow_is_incomplete() {
    let joined = TaskWithPrivateData {
        task: TaskDraft::new("t").into_task(EntityId::new()),
        private: None,
    };
    assert!(!joined.is_completed());
}
