//! Identity mapper: local rows ↔ remote record identities.
//!
//! One mapping row per shared row, in `sync_metadata`. Every function takes
//! the open [`StoreTx`] so mapping writes commit or roll back together with
//! the data write they describe. Lookups in either direction hit a unique
//! index.

use crate::error::SyncResult;
use crate::state::SyncState;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tasksync_storage::{StorageError, StoreTx};
use tasksync_types::{EntityId, RecordName, RecordType, RecordVersion};
use tracing::{debug, warn};

/// Sync bookkeeping for one shared row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMapping {
    pub record_name: RecordName,
    /// Version of the record last seen on, or acknowledged by, the remote.
    pub last_known_remote_version: Option<RecordVersion>,
    pub parent: Option<RecordName>,
    pub state: SyncState,
    /// Bumped on every local write of the row.
    pub local_version: u64,
    /// The `local_version` the remote last acknowledged.
    pub synced_local_version: u64,
    pub push_attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RecordMapping {
    /// Mapping for a row created on this device.
    pub fn new_local(record_name: RecordName, parent: Option<RecordName>) -> Self {
        Self {
            record_name,
            last_known_remote_version: None,
            parent,
            state: SyncState::LocalOnly,
            local_version: 1,
            synced_local_version: 0,
            push_attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn record_type(&self) -> &RecordType {
        self.record_name.record_type()
    }

    pub fn local_key(&self) -> EntityId {
        self.record_name.id()
    }

    /// Whether a local change still has to reach the remote.
    pub fn is_dirty(&self) -> bool {
        self.state == SyncState::Deleted
            || self.last_known_remote_version.is_none()
            || self.local_version > self.synced_local_version
    }
}

const COLUMNS: &str = "record_name, last_known_remote_version, parent_record_name, sync_state, \
                       local_version, synced_local_version, push_attempts, last_error, updated_at";

struct RawMapping {
    record_name: String,
    version: Option<i64>,
    parent: Option<String>,
    state: String,
    local_version: i64,
    synced_local_version: i64,
    push_attempts: i64,
    last_error: Option<String>,
    updated_at: String,
}

impl RawMapping {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_name: row.get(0)?,
            version: row.get(1)?,
            parent: row.get(2)?,
            state: row.get(3)?,
            local_version: row.get(4)?,
            synced_local_version: row.get(5)?,
            push_attempts: row.get(6)?,
            last_error: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_mapping(self) -> SyncResult<RecordMapping> {
        let state = self
            .state
            .parse::<SyncState>()
            .map_err(StorageError::InvalidData)?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| StorageError::InvalidData(format!("updated_at: {e}")))?
            .with_timezone(&Utc);
        Ok(RecordMapping {
            record_name: RecordName::parse(&self.record_name)?,
            last_known_remote_version: self.version.map(|v| RecordVersion::new(from_sql_int(v))),
            parent: self.parent.as_deref().map(RecordName::parse).transpose()?,
            state,
            local_version: from_sql_int(self.local_version),
            synced_local_version: from_sql_int(self.synced_local_version),
            push_attempts: u32::try_from(self.push_attempts).unwrap_or(u32::MAX),
            last_error: self.last_error,
            updated_at,
        })
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn query_many(tx: &StoreTx<'_>, filter: &str, args: impl rusqlite::Params) -> SyncResult<Vec<RecordMapping>> {
    let sql = format!("SELECT {COLUMNS} FROM sync_metadata WHERE {filter} ORDER BY rowid");
    let mut stmt = tx.sql().prepare(&sql)?;
    let raw = stmt
        .query_map(args, RawMapping::read)?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawMapping::into_mapping).collect()
}

// ── Lookups ──────────────────────────────────────────────────────

/// Remote identity of a local row.
pub fn record_identity(
    tx: &StoreTx<'_>,
    record_type: &RecordType,
    local_key: EntityId,
) -> SyncResult<Option<RecordName>> {
    let name: Option<String> = tx
        .sql()
        .query_row(
            "SELECT record_name FROM sync_metadata WHERE record_type = ?1 AND local_key = ?2",
            params![record_type.as_str(), local_key.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(name.as_deref().map(RecordName::parse).transpose()?)
}

/// Local row behind a remote identity.
pub fn local_key(
    tx: &StoreTx<'_>,
    record_name: &RecordName,
) -> SyncResult<Option<(RecordType, EntityId)>> {
    let found: Option<(String, String)> = tx
        .sql()
        .query_row(
            "SELECT record_type, local_key FROM sync_metadata WHERE record_name = ?1",
            [record_name.to_string()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    found
        .map(|(record_type, key)| -> SyncResult<_> {
            let key = EntityId::parse(&key).map_err(StorageError::from)?;
            Ok((RecordType::new(record_type), key))
        })
        .transpose()
}

pub fn mapping(
    tx: &StoreTx<'_>,
    record_type: &RecordType,
    local_key: EntityId,
) -> SyncResult<Option<RecordMapping>> {
    Ok(query_many(
        tx,
        "record_type = ?1 AND local_key = ?2",
        params![record_type.as_str(), local_key.to_string()],
    )?
    .pop())
}

pub fn mapping_by_name(tx: &StoreTx<'_>, record_name: &RecordName) -> SyncResult<Option<RecordMapping>> {
    Ok(query_many(tx, "record_name = ?1", [record_name.to_string()])?.pop())
}

/// Mappings with local changes the remote has not acknowledged, in creation
/// order.
pub fn dirty_mappings(tx: &StoreTx<'_>) -> SyncResult<Vec<RecordMapping>> {
    query_many(
        tx,
        "sync_state = 'deleted' OR last_known_remote_version IS NULL \
         OR local_version > synced_local_version",
        [],
    )
}

pub fn dirty_count(tx: &StoreTx<'_>) -> SyncResult<usize> {
    let count: i64 = tx.sql().query_row(
        "SELECT COUNT(*) FROM sync_metadata WHERE sync_state = 'deleted' \
         OR last_known_remote_version IS NULL OR local_version > synced_local_version",
        [],
        |r| r.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or_default())
}

/// Mappings whose parent linkage points at `parent`.
pub fn children_of(tx: &StoreTx<'_>, parent: &RecordName) -> SyncResult<Vec<RecordMapping>> {
    query_many(tx, "parent_record_name = ?1", [parent.to_string()])
}

// ── Writes ───────────────────────────────────────────────────────

/// Inserts or fully replaces the mapping of a row.
pub fn upsert_mapping(tx: &StoreTx<'_>, mapping: &RecordMapping) -> SyncResult<()> {
    let parent_type = mapping.parent.as_ref().map(|p| p.record_type().to_string());
    tx.sql().execute(
        "INSERT INTO sync_metadata (record_type, local_key, record_name, \
             last_known_remote_version, parent_record_type, parent_record_name, sync_state, \
             local_version, synced_local_version, push_attempts, last_error, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT (record_type, local_key) DO UPDATE SET \
             last_known_remote_version = excluded.last_known_remote_version, \
             parent_record_type = excluded.parent_record_type, \
             parent_record_name = excluded.parent_record_name, \
             sync_state = excluded.sync_state, \
             local_version = excluded.local_version, \
             synced_local_version = excluded.synced_local_version, \
             push_attempts = excluded.push_attempts, \
             last_error = excluded.last_error, \
             updated_at = excluded.updated_at",
        params![
            mapping.record_type().as_str(),
            mapping.local_key().to_string(),
            mapping.record_name.to_string(),
            mapping.last_known_remote_version.map(|v| to_sql_int(v.value())),
            parent_type,
            mapping.parent.as_ref().map(ToString::to_string),
            mapping.state.as_str(),
            to_sql_int(mapping.local_version),
            to_sql_int(mapping.synced_local_version),
            i64::from(mapping.push_attempts),
            mapping.last_error,
            mapping.updated_at.to_rfc3339(),
        ],
    )?;
    debug!(record = %mapping.record_name, state = %mapping.state, "upserted mapping");
    Ok(())
}

/// Moves a mapping to `state`. Returns `false` if there is no mapping.
pub fn set_state(tx: &StoreTx<'_>, record_name: &RecordName, state: SyncState) -> SyncResult<bool> {
    let Some(current) = mapping_by_name(tx, record_name)? else {
        return Ok(false);
    };
    if !current.state.can_transition_to(state) {
        warn!(record = %record_name, from = %current.state, to = %state, "unexpected sync state transition");
    }
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET sync_state = ?2, updated_at = ?3 WHERE record_name = ?1",
        params![record_name.to_string(), state.as_str(), now()],
    )?;
    Ok(changed > 0)
}

/// Records a local write of the row and refreshes its parent linkage.
pub fn record_local_write(
    tx: &StoreTx<'_>,
    record_name: &RecordName,
    parent: Option<&RecordName>,
) -> SyncResult<bool> {
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET local_version = local_version + 1, \
             parent_record_type = ?2, parent_record_name = ?3, updated_at = ?4 \
         WHERE record_name = ?1",
        params![
            record_name.to_string(),
            parent.map(|p| p.record_type().to_string()),
            parent.map(ToString::to_string),
            now()
        ],
    )?;
    Ok(changed > 0)
}

pub fn mark_pushing(tx: &StoreTx<'_>, record_name: &RecordName) -> SyncResult<bool> {
    set_state(tx, record_name, SyncState::Pushing)
}

/// Records an acknowledged push of `pushed_local_version`.
///
/// The mapping stays dirty if the row was written or deleted again while the
/// push was in flight.
pub fn mark_synced(
    tx: &StoreTx<'_>,
    record_name: &RecordName,
    version: RecordVersion,
    pushed_local_version: u64,
) -> SyncResult<bool> {
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET \
             sync_state = CASE sync_state WHEN 'deleted' THEN 'deleted' ELSE 'synced' END, \
             last_known_remote_version = ?2, \
             synced_local_version = MAX(synced_local_version, ?3), push_attempts = 0, \
             last_error = NULL, updated_at = ?4 \
         WHERE record_name = ?1",
        params![
            record_name.to_string(),
            to_sql_int(version.value()),
            to_sql_int(pushed_local_version),
            now()
        ],
    )?;
    Ok(changed > 0)
}

/// Records the remote's acknowledgement of a push that was based on
/// `base_version`.
///
/// A pull may have applied a newer remote version while the push was in
/// flight. The remote then holds the pushed snapshot while the row holds
/// the pulled content, so the row is marked as written again and the pulled
/// content goes out with the next push. An acknowledgement older than the
/// version already applied changes nothing.
pub fn acknowledge_push(
    tx: &StoreTx<'_>,
    record_name: &RecordName,
    base_version: Option<RecordVersion>,
    version: RecordVersion,
    pushed_local_version: u64,
) -> SyncResult<bool> {
    let Some(current) = mapping_by_name(tx, record_name)? else {
        return Ok(false);
    };
    if current.last_known_remote_version == base_version {
        return mark_synced(tx, record_name, version, pushed_local_version);
    }
    if !version.is_newer_than(current.last_known_remote_version) {
        debug!(record = %record_name, %version, "acknowledged push already superseded");
        return Ok(false);
    }
    warn!(record = %record_name, %version, "remote changed while pushing, pushing applied state again");
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET last_known_remote_version = ?2, \
             local_version = MAX(local_version, synced_local_version) + 1, push_attempts = 0, \
             last_error = NULL, updated_at = ?3 \
         WHERE record_name = ?1",
        params![record_name.to_string(), to_sql_int(version.value()), now()],
    )?;
    Ok(changed > 0)
}

/// Records a failed push attempt. The state is left as it was.
pub fn mark_failed(tx: &StoreTx<'_>, record_name: &RecordName, error: &str) -> SyncResult<bool> {
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET push_attempts = push_attempts + 1, last_error = ?2, \
             updated_at = ?3 \
         WHERE record_name = ?1",
        params![record_name.to_string(), error, now()],
    )?;
    Ok(changed > 0)
}

/// Flags the mapping of a locally deleted row for a deletion push.
pub fn mark_deleted(tx: &StoreTx<'_>, record_name: &RecordName) -> SyncResult<bool> {
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET sync_state = 'deleted', local_version = local_version + 1, \
             updated_at = ?2 \
         WHERE record_name = ?1",
        params![record_name.to_string(), now()],
    )?;
    Ok(changed > 0)
}

pub fn remove(tx: &StoreTx<'_>, record_name: &RecordName) -> SyncResult<bool> {
    let changed = tx.sql().execute(
        "DELETE FROM sync_metadata WHERE record_name = ?1",
        [record_name.to_string()],
    )?;
    Ok(changed > 0)
}

/// Clears the parent linkage of every child of `parent`. Returns how many
/// mappings changed.
pub fn detach_children(tx: &StoreTx<'_>, parent: &RecordName) -> SyncResult<usize> {
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET parent_record_type = NULL, parent_record_name = NULL, \
             updated_at = ?2 \
         WHERE parent_record_name = ?1",
        params![parent.to_string(), now()],
    )?;
    Ok(changed)
}

/// Clears the parent linkage of every child of a locally deleted `parent`
/// and counts it as a local write of each child.
///
/// The store has already nulled the children's parent column; bumping their
/// version pushes that change.
pub fn release_children(tx: &StoreTx<'_>, parent: &RecordName) -> SyncResult<usize> {
    let changed = tx.sql().execute(
        "UPDATE sync_metadata SET parent_record_type = NULL, parent_record_name = NULL, \
             local_version = local_version + 1, updated_at = ?2 \
         WHERE parent_record_name = ?1",
        params![parent.to_string(), now()],
    )?;
    Ok(changed)
}
