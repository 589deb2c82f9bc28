//! Deferred application of pulled records whose parent is not known yet.
//!
//! Rows are keyed by the waiting record's name and indexed by the missing
//! parent's name, so the arrival of a parent drains exactly its children.

use crate::error::SyncResult;
use crate::transport::IncomingRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use tasksync_model::Row;
use tasksync_storage::{StorageError, StoreTx};
use tasksync_types::{RecordName, RecordType, RecordVersion};
use tracing::debug;

/// A record waiting for `parent`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApplication {
    pub record: IncomingRecord,
    pub parent: RecordName,
    pub received_at: DateTime<Utc>,
}

/// Fixed-width UTC text, so stored times compare correctly as strings.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parks `record` until `missing_parent` arrives.
///
/// A later version of an already parked record replaces it; an older one is
/// ignored.
pub fn defer(tx: &StoreTx<'_>, record: &IncomingRecord, missing_parent: &RecordName) -> SyncResult<()> {
    tx.sql().execute(
        "INSERT INTO sync_pending_applications \
             (record_name, record_type, parent_record_name, payload, version, received_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (record_name) DO UPDATE SET \
             parent_record_name = excluded.parent_record_name, \
             payload = excluded.payload, \
             version = excluded.version, \
             received_at = excluded.received_at \
         WHERE excluded.version > sync_pending_applications.version",
        params![
            record.record_name.to_string(),
            record.record_type.as_str(),
            missing_parent.to_string(),
            serde_json::to_string(&record.payload)?,
            i64::try_from(record.version.value()).unwrap_or(i64::MAX),
            timestamp(Utc::now()),
        ],
    )?;
    debug!(record = %record.record_name, parent = %missing_parent, "deferred until parent arrives");
    Ok(())
}

fn select(tx: &StoreTx<'_>, filter: &str, args: impl rusqlite::Params) -> SyncResult<Vec<PendingApplication>> {
    let sql = format!(
        "SELECT record_name, record_type, parent_record_name, payload, version, received_at \
         FROM sync_pending_applications WHERE {filter} ORDER BY version"
    );
    let mut stmt = tx.sql().prepare(&sql)?;
    let raw = stmt
        .query_map(args, |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(name, record_type, parent, payload, version, received_at)| -> SyncResult<_> {
            let parent = RecordName::parse(&parent)?;
            let payload: Row = serde_json::from_str(&payload)?;
            let received_at = DateTime::parse_from_rfc3339(&received_at)
                .map_err(|e| StorageError::InvalidData(format!("received_at: {e}")))?
                .with_timezone(&Utc);
            Ok(PendingApplication {
                record: IncomingRecord {
                    record_type: RecordType::new(record_type),
                    record_name: RecordName::parse(&name)?,
                    payload,
                    parent: Some(parent.clone()),
                    deleted: false,
                    version: RecordVersion::new(u64::try_from(version).unwrap_or_default()),
                },
                parent,
                received_at,
            })
        })
        .collect()
}

/// Removes and returns the records waiting for `parent`.
pub fn take_children(tx: &StoreTx<'_>, parent: &RecordName) -> SyncResult<Vec<IncomingRecord>> {
    let waiting = select(tx, "parent_record_name = ?1", [parent.to_string()])?;
    tx.sql().execute(
        "DELETE FROM sync_pending_applications WHERE parent_record_name = ?1",
        [parent.to_string()],
    )?;
    Ok(waiting.into_iter().map(|p| p.record).collect())
}

/// Drops the records waiting for a parent that was deleted.
pub fn discard_children(tx: &StoreTx<'_>, parent: &RecordName) -> SyncResult<usize> {
    Ok(tx.sql().execute(
        "DELETE FROM sync_pending_applications WHERE parent_record_name = ?1",
        [parent.to_string()],
    )?)
}

/// Drops a parked record, e.g. because a deletion of it arrived.
pub fn discard(tx: &StoreTx<'_>, record_name: &RecordName) -> SyncResult<bool> {
    Ok(tx.sql().execute(
        "DELETE FROM sync_pending_applications WHERE record_name = ?1",
        [record_name.to_string()],
    )? > 0)
}

/// Version of a parked record, if any.
pub fn parked_version(tx: &StoreTx<'_>, record_name: &RecordName) -> SyncResult<Option<RecordVersion>> {
    Ok(select(tx, "record_name = ?1", [record_name.to_string()])?
        .pop()
        .map(|p| p.record.version))
}

/// Removes and returns records received before `cutoff`.
pub fn expire(tx: &StoreTx<'_>, cutoff: DateTime<Utc>) -> SyncResult<Vec<PendingApplication>> {
    let expired = select(tx, "received_at < ?1", [timestamp(cutoff)])?;
    tx.sql().execute(
        "DELETE FROM sync_pending_applications WHERE received_at < ?1",
        [timestamp(cutoff)],
    )?;
    Ok(expired)
}

pub fn count(tx: &StoreTx<'_>) -> SyncResult<usize> {
    let count: i64 = tx
        .sql()
        .query_row("SELECT COUNT(*) FROM sync_pending_applications", [], |r| r.get(0))?;
    Ok(usize::try_from(count).unwrap_or_default())
}

pub fn all(tx: &StoreTx<'_>) -> SyncResult<Vec<PendingApplication>> {
    select(tx, "1 = 1", [])
}
