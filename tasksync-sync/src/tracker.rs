//! Keeps identity mappings in step with local writes to shared tables.

use crate::error::{SyncError, SyncResult};
use crate::identity::{self, RecordMapping};
use crate::sharing;
use crate::state::SyncState;
use serde_json::Value;
use std::sync::Arc;
use tasksync_model::{Row, SharedTable};
use tasksync_storage::{
    LocalStore, RowChange, RowEvent, RowTrigger, StorageError, StorageResult, StoreTx,
    WriteOrigin,
};
use tasksync_types::{EntityId, RecordName, RecordType};
use tracing::{debug, info};

pub(crate) const TRACKER_NAME: &str = "sync-tracker";

/// Trigger on every shared table and event.
///
/// Only local writes are tracked; the engine maps rows it applies from the
/// remote itself.
pub struct SyncTracker;

impl SyncTracker {
    /// Registers the tracker on every shared table of `store`, once.
    pub fn install(store: &LocalStore) {
        let tracker: Arc<dyn RowTrigger> = Arc::new(SyncTracker);
        for table in store.schema().shared_tables() {
            for event in RowEvent::ALL {
                let installed = store
                    .trigger_names(table.name, event)
                    .iter()
                    .any(|name| name == TRACKER_NAME);
                if !installed {
                    store.register_trigger(table.name, event, Arc::clone(&tracker));
                }
            }
        }
    }

    fn track(tx: &StoreTx<'_>, table: &SharedTable, change: &RowChange) -> SyncResult<()> {
        let record_name = RecordName::new(table.name, change.key);
        match change.event {
            RowEvent::Inserted | RowEvent::Updated => {
                let parent = parent_of(table, &change.row)?;
                if !identity::record_local_write(tx, &record_name, parent.as_ref())? {
                    identity::upsert_mapping(tx, &RecordMapping::new_local(record_name, parent))?;
                }
            }
            RowEvent::Deleted => {
                match identity::mapping_by_name(tx, &record_name)? {
                    // Never left this device: nothing to delete remotely.
                    Some(m) if m.state == SyncState::LocalOnly => {
                        identity::remove(tx, &record_name)?;
                    }
                    Some(_) => {
                        identity::mark_deleted(tx, &record_name)?;
                    }
                    None => {}
                }
                let released = identity::release_children(tx, &record_name)?;
                sharing::forget_share(tx, &record_name)?;
                debug!(record = %record_name, released, "tracked local delete");
            }
        }
        Ok(())
    }
}

impl RowTrigger for SyncTracker {
    fn name(&self) -> &str {
        TRACKER_NAME
    }

    fn fire(&self, tx: &mut StoreTx<'_>, change: &RowChange) -> StorageResult<()> {
        if tx.origin() == WriteOrigin::Remote {
            return Ok(());
        }
        let Some(table) = tx.schema().shared_table(&change.table) else {
            return Ok(());
        };
        Self::track(tx, table, change).map_err(into_storage)
    }
}

fn into_storage(err: SyncError) -> StorageError {
    match err {
        SyncError::Storage(inner) => inner,
        SyncError::Serialization(inner) => StorageError::Serialization(inner),
        other => StorageError::InvalidData(other.to_string()),
    }
}

/// Parent linkage of a shared row, read from its declared parent column.
pub(crate) fn parent_of(table: &SharedTable, row: &Row) -> SyncResult<Option<RecordName>> {
    let Some(link) = table.parent else {
        return Ok(None);
    };
    match row.get(link.column) {
        Some(Value::String(raw)) => {
            let id = EntityId::parse(raw).map_err(StorageError::from)?;
            Ok(Some(RecordName::new(link.table, id)))
        }
        _ => Ok(None),
    }
}

/// Gives every shared row without a mapping a `LocalOnly` one.
///
/// Rows written before the tracker was installed would otherwise never be
/// pushed.
pub fn adopt_untracked(tx: &StoreTx<'_>) -> SyncResult<usize> {
    let mut adopted = 0;
    for table in tx.schema().shared_tables() {
        let record_type = RecordType::new(table.name);
        for row in tx.select_all(table.name)? {
            let Some(Value::String(raw)) = row.get(table.primary_key) else {
                continue;
            };
            let key = EntityId::parse(raw).map_err(StorageError::from)?;
            if identity::record_identity(tx, &record_type, key)?.is_some() {
                continue;
            }
            let parent = parent_of(table, &row)?;
            identity::upsert_mapping(
                tx,
                &RecordMapping::new_local(RecordName::new(table.name, key), parent),
            )?;
            adopted += 1;
        }
    }
    if adopted > 0 {
        info!(rows = adopted, "adopted untracked shared rows");
    }
    Ok(adopted)
}
