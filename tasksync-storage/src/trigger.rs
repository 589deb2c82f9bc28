//! Row-level triggers in the store's transaction pipeline.
//!
//! A trigger is an explicit callback registered for one table and one event.
//! It runs synchronously inside the transaction that performed the write,
//! right after the statement succeeded, and can write through the same
//! [`StoreTx`]. An error from a trigger fails the whole transaction.

use crate::error::StorageResult;
use crate::store::StoreTx;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tasksync_model::Row;
use tasksync_types::EntityId;

/// The kind of row write a trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowEvent {
    Inserted,
    Updated,
    Deleted,
}

impl RowEvent {
    pub const ALL: [RowEvent; 3] = [RowEvent::Inserted, RowEvent::Updated, RowEvent::Deleted];
}

impl fmt::Display for RowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => f.write_str("insert"),
            Self::Updated => f.write_str("update"),
            Self::Deleted => f.write_str("delete"),
        }
    }
}

/// A row write handed to triggers.
///
/// `row` is the full row as stored after the write, or the row as it was
/// before a delete.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub table: String,
    pub event: RowEvent,
    pub key: EntityId,
    pub row: Row,
}

/// A callback bound to a table and event.
pub trait RowTrigger: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs inside the writing transaction.
    fn fire(&self, tx: &mut StoreTx<'_>, change: &RowChange) -> StorageResult<()>;
}

/// Triggers keyed by table and event, in registration order.
#[derive(Clone, Default)]
pub struct TriggerRegistry {
    hooks: HashMap<(String, RowEvent), Vec<Arc<dyn RowTrigger>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: &str, event: RowEvent, trigger: Arc<dyn RowTrigger>) {
        self.hooks
            .entry((table.to_string(), event))
            .or_default()
            .push(trigger);
    }

    /// Triggers for a table and event, cloned so the caller can run them
    /// while holding the transaction mutably.
    pub fn hooks(&self, table: &str, event: RowEvent) -> Vec<Arc<dyn RowTrigger>> {
        self.hooks
            .get(&(table.to_string(), event))
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the triggers bound to a table and event.
    pub fn names(&self, table: &str, event: RowEvent) -> Vec<String> {
        self.hooks(table, event)
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self
            .hooks
            .iter()
            .map(|((table, event), hooks)| format!("{table}:{event}x{}", hooks.len()))
            .collect();
        keys.sort();
        f.debug_struct("TriggerRegistry").field("hooks", &keys).finish()
    }
}
