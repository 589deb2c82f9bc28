//! Shadow materialization.
//!
//! Every row inserted into a shared table that has a private counterpart gets
//! its shadow row inside the same transaction, whether the insert came from a
//! local user action or from a remote pull. A reader can therefore never see
//! a task without its private state.

use crate::error::StorageResult;
use crate::store::StoreTx;
use crate::trigger::{RowChange, RowTrigger};
use serde_json::Value;
use tasksync_model::{PrivateTable, Row};
use tracing::debug;

/// `Inserted` trigger on a shared table creating the matching private row.
///
/// Idempotent: an existing shadow is left untouched, so replaying a pull or a
/// local insert racing a pull of the same identity never duplicates or resets
/// private state.
pub struct ShadowMaterializer {
    private: PrivateTable,
    name: String,
}

impl ShadowMaterializer {
    pub fn new(private: PrivateTable) -> Self {
        let name = format!("shadow:{}", private.name);
        Self { private, name }
    }

    pub fn private_table(&self) -> &PrivateTable {
        &self.private
    }
}

impl RowTrigger for ShadowMaterializer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fire(&self, tx: &mut StoreTx<'_>, change: &RowChange) -> StorageResult<()> {
        let mut shadow = Row::new();
        shadow.insert(
            self.private.key_column.to_string(),
            Value::String(change.key.to_string()),
        );
        if tx.insert_if_absent(self.private.name, &shadow)? {
            debug!(table = self.private.name, key = %change.key, "materialized shadow row");
        }
        Ok(())
    }
}

/// Creates shadows for shared rows that lack one. Returns how many were made.
///
/// Covers rows written before the materializer was bound (older store files).
pub fn backfill(tx: &mut StoreTx<'_>, private: &PrivateTable) -> StorageResult<usize> {
    let shared_pk = tx.schema().primary_key_of(private.shadows).unwrap_or("id");
    let sql = format!(
        "INSERT INTO \"{private}\" (\"{key}\") \
         SELECT s.\"{pk}\" FROM \"{shared}\" s \
         WHERE NOT EXISTS (SELECT 1 FROM \"{private}\" p WHERE p.\"{key}\" = s.\"{pk}\")",
        private = private.name,
        key = private.key_column,
        shared = private.shadows,
        pk = shared_pk,
    );
    Ok(tx.sql().execute(&sql, [])?)
}
