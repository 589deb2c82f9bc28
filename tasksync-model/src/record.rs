use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tasksync_types::EntityId;

/// A row as a bag of column values keyed by column name.
///
/// This is also the payload shape exchanged with the remote store.
pub type Row = serde_json::Map<String, Value>;

/// A typed row stored in a declared table.
pub trait TableRecord: Serialize + DeserializeOwned {
    /// Name of the table the record lives in.
    const TABLE: &'static str;

    /// Primary key value.
    fn key(&self) -> EntityId;

    /// Converts the record into a column bag.
    fn to_row(&self) -> Result<Row, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "{} must serialize to an object, got {other}",
                Self::TABLE
            ))),
        }
    }

    /// Rebuilds the record from a column bag.
    fn from_row(row: Row) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(row))
    }
}

/// Checks that `row`, as stored in `table`, decodes as that table's typed
/// record. Tables without a typed record pass.
pub fn check_row(table: &str, row: Row) -> Result<(), serde_json::Error> {
    use crate::{Group, PrivateTaskState, Task};

    if table == Group::TABLE {
        Group::from_row(row).map(drop)
    } else if table == Task::TABLE {
        Task::from_row(row).map(drop)
    } else if table == PrivateTaskState::TABLE {
        PrivateTaskState::from_row(row).map(drop)
    } else {
        Ok(())
    }
}
