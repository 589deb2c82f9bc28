//! Sync engine: push local changes, pull and apply remote ones.
//!
//! Transport calls are async and never run inside a store transaction. A
//! push snapshots the row in one transaction, awaits the remote, then
//! records the outcome in a second one. A pull applies every incoming
//! record in its own transaction, so a failure only ever loses that record's
//! work.

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::identity::{self, RecordMapping};
use crate::pending;
use crate::sharing;
use crate::state::SyncState;
use crate::tracker::{self, SyncTracker};
use crate::transport::{IncomingRecord, OutgoingRecord};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tasksync_model::{check_row, Row, SharedTable, SyncSchema};
use tasksync_storage::{LocalStore, StoreTx, WriteOrigin};
use tasksync_types::{EntityId, RecordName, RecordType};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// What happened to one pulled record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Inserted or replaced the local row.
    Applied,
    /// Replaced a row that had unpushed local changes.
    Resolved,
    /// Not newer than the known version, or superseded by a pending local
    /// deletion. Local state is untouched.
    ConflictDropped,
    /// Parked until `parent` arrives.
    Deferred { parent: RecordName },
    /// The local row and its mapping were removed.
    Deleted,
    /// Not a shared record type.
    Ignored,
}

#[derive(Debug, Default, Clone)]
pub struct PushReport {
    pub pushed: Vec<RecordName>,
    pub deleted: Vec<RecordName>,
    pub failed: Vec<(RecordName, String)>,
    /// Children not pushed because their parent failed this round.
    pub held_back: Vec<RecordName>,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.held_back.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PullReport {
    pub outcomes: Vec<(RecordName, ApplyOutcome)>,
    /// Records whose application failed and was rolled back.
    pub failed: Vec<(RecordName, String)>,
    /// [`SyncError::OrphanedReference`] for every parked record dropped
    /// after the retention period.
    pub orphans: Vec<SyncError>,
}

impl PullReport {
    pub fn count(&self, matches: impl Fn(&ApplyOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches(o)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, ApplyOutcome::Applied | ApplyOutcome::Resolved))
    }

    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, ApplyOutcome::Deferred { .. }))
    }

    pub fn dropped(&self) -> usize {
        self.count(|o| *o == ApplyOutcome::ConflictDropped)
    }

    /// The last outcome recorded for `record`.
    pub fn outcome_of(&self, record: &RecordName) -> Option<&ApplyOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(name, _)| name == record)
            .map(|(_, outcome)| outcome)
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}

enum Pushed {
    Written,
    Deleted,
}

/// Drives synchronization of one local store with one remote.
pub struct SyncEngine {
    ctx: SyncContext,
}

impl SyncEngine {
    /// Installs local-write tracking on the store and maps rows written
    /// before it existed.
    pub fn new(ctx: SyncContext) -> SyncResult<Self> {
        SyncTracker::install(&ctx.store);
        ctx.store
            .execute(WriteOrigin::Local, |tx| tracker::adopt_untracked(tx))?;
        info!(device = %ctx.config.device_name, "sync engine ready");
        Ok(Self { ctx })
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.ctx.store
    }

    /// Pushes, then pulls.
    pub async fn sync_once(&self) -> SyncResult<SyncReport> {
        let push = self.push_pending().await?;
        let pull = self.pull().await?;
        Ok(SyncReport { push, pull })
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Pushes every dirty mapping, parents before children and deletions
    /// last.
    pub async fn push_pending(&self) -> SyncResult<PushReport> {
        let schema = self.ctx.store.schema();
        let mut dirty = self.ctx.store.read(|tx| identity::dirty_mappings(tx))?;
        dirty.sort_by_key(|m| push_order(schema, m));

        let mut report = PushReport::default();
        let mut blocked: HashSet<RecordName> = HashSet::new();
        for mapping in dirty {
            let name = mapping.record_name;
            if mapping.parent.as_ref().is_some_and(|p| blocked.contains(p)) {
                debug!(record = %name, "parent failed to push, holding back");
                report.held_back.push(name.clone());
                blocked.insert(name);
                continue;
            }
            match self.push_one(&name).await {
                Ok(Some(Pushed::Written)) => report.pushed.push(name),
                Ok(Some(Pushed::Deleted)) => report.deleted.push(name),
                Ok(None) => {}
                Err(err @ SyncError::Storage(_)) => return Err(err),
                Err(err) => {
                    warn!(record = %name, %err, "push failed");
                    report.failed.push((name.clone(), err.to_string()));
                    blocked.insert(name);
                }
            }
        }

        if !report.pushed.is_empty() || !report.deleted.is_empty() || !report.failed.is_empty() {
            info!(
                pushed = report.pushed.len(),
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "push finished"
            );
        }
        Ok(report)
    }

    /// Pushes one record now, if it has anything to push.
    pub async fn push_record(&self, record_name: &RecordName) -> SyncResult<()> {
        self.push_one(record_name).await.map(|_| ())
    }

    async fn push_one(&self, name: &RecordName) -> SyncResult<Option<Pushed>> {
        let prepared = self
            .ctx
            .store
            .execute(WriteOrigin::Local, |tx| prepare_push(tx, name))?;
        let Some((record, pushed_local_version)) = prepared else {
            return Ok(None);
        };
        let deleted = record.deleted;
        let base_version = record.base_version;

        let transport = &self.ctx.transport;
        let result = with_retry(&self.ctx.config, "push", || transport.push(record.clone())).await;
        match result {
            Ok(version) => {
                self.ctx
                    .store
                    .execute(WriteOrigin::Local, |tx| -> SyncResult<()> {
                        if deleted {
                            identity::remove(tx, name)?;
                        } else {
                            identity::acknowledge_push(tx, name, base_version, version, pushed_local_version)?;
                        }
                        Ok(())
                    })?;
                debug!(record = %name, %version, deleted, "pushed");
                Ok(Some(if deleted { Pushed::Deleted } else { Pushed::Written }))
            }
            Err(err) => {
                let message = err.to_string();
                self.ctx
                    .store
                    .execute(WriteOrigin::Local, |tx| identity::mark_failed(tx, name, &message))?;
                Err(err)
            }
        }
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Fetches remote changes and applies them one transaction each.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        let transport = &self.ctx.transport;
        let incoming = with_retry(&self.ctx.config, "pull", || transport.pull()).await?;

        let mut report = PullReport::default();
        for record in incoming {
            let name = record.record_name.clone();
            let applied = self
                .ctx
                .store
                .execute(WriteOrigin::Remote, |tx| -> SyncResult<_> {
                    let mut batch = PullReport::default();
                    apply(tx, record, &mut batch)?;
                    Ok(batch)
                });
            match applied {
                Ok(batch) => {
                    report.outcomes.extend(batch.outcomes);
                    report.failed.extend(batch.failed);
                }
                Err(err) => {
                    warn!(record = %name, %err, "could not apply pulled record");
                    report.failed.push((name, err.to_string()));
                }
            }
        }
        report.orphans = self.expire_orphans()?;

        if !report.outcomes.is_empty() || !report.orphans.is_empty() {
            info!(
                applied = report.applied(),
                deferred = report.deferred(),
                dropped = report.dropped(),
                orphans = report.orphans.len(),
                "pull finished"
            );
        }
        Ok(report)
    }

    /// Drops parked records older than the retention period and reports
    /// each as an orphaned reference.
    pub fn expire_orphans(&self) -> SyncResult<Vec<SyncError>> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.ctx.config.orphan_retention()) else {
            return Ok(Vec::new());
        };
        let expired = self
            .ctx
            .store
            .execute(WriteOrigin::Remote, |tx| pending::expire(tx, cutoff))?;
        Ok(expired
            .into_iter()
            .map(|p| {
                warn!(record = %p.record.record_name, parent = %p.parent, "parent never arrived, dropping record");
                SyncError::OrphanedReference {
                    record: p.record.record_name,
                    parent: p.parent,
                }
            })
            .collect())
    }

    // ── Status ───────────────────────────────────────────────────

    /// Sync bookkeeping of one row, if it is tracked.
    pub fn status(&self, record_type: &RecordType, id: EntityId) -> SyncResult<Option<RecordMapping>> {
        self.ctx.store.read(|tx| identity::mapping(tx, record_type, id))
    }

    /// Number of rows with changes the remote has not acknowledged.
    pub fn pending_count(&self) -> SyncResult<usize> {
        self.ctx.store.read(|tx| identity::dirty_count(tx))
    }

    /// Number of pulled records waiting for their parent.
    pub fn deferred_count(&self) -> SyncResult<usize> {
        self.ctx.store.read(|tx| pending::count(tx))
    }
}

/// Parents first by schema order; deletions after all writes, children
/// first.
fn push_order(schema: &SyncSchema, mapping: &RecordMapping) -> (bool, usize) {
    let rank = schema.push_rank(mapping.record_type().as_str());
    match mapping.state {
        SyncState::Deleted => (true, usize::MAX - rank),
        _ => (false, rank),
    }
}

fn prepare_push(
    tx: &mut StoreTx<'_>,
    name: &RecordName,
) -> SyncResult<Option<(OutgoingRecord, u64)>> {
    let Some(mapping) = identity::mapping_by_name(tx, name)? else {
        return Ok(None);
    };
    if !mapping.is_dirty() {
        return Ok(None);
    }

    let record_type = mapping.record_type().clone();
    let (payload, deleted) = if mapping.state == SyncState::Deleted {
        (Row::new(), true)
    } else {
        let Some(row) = tx.select(record_type.as_str(), mapping.local_key())? else {
            warn!(record = %name, "mapped row is missing, dropping mapping");
            identity::remove(tx, name)?;
            return Ok(None);
        };
        identity::mark_pushing(tx, name)?;
        (row, false)
    };

    Ok(Some((
        OutgoingRecord {
            record_type,
            record_name: name.clone(),
            payload,
            parent: mapping.parent.clone(),
            deleted,
            base_version: mapping.last_known_remote_version,
        },
        mapping.local_version,
    )))
}

/// Runs a transport call under the configured timeout, retrying transient
/// failures with capped exponential backoff.
pub(crate) async fn with_retry<T, F, Fut>(config: &SyncConfig, what: &str, mut call: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match timeout(config.transport_timeout(), call()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::TransientTransport(format!("{what} timed out"))),
        };
        match outcome {
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.backoff(attempt);
                warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "{what} failed, retrying");
                sleep(delay).await;
            }
            other => return other,
        }
    }
}

// ── Applying pulled records ──────────────────────────────────────

/// Applies `record`, then every parked child it unblocks, in the caller's
/// transaction.
///
/// Each child runs under its own savepoint: a child that fails is rolled
/// back and reported in `batch.failed` without undoing its parent.
fn apply(tx: &mut StoreTx<'_>, record: IncomingRecord, batch: &mut PullReport) -> SyncResult<()> {
    let outcome = apply_one(tx, &record)?;
    let unblocks = matches!(outcome, ApplyOutcome::Applied | ApplyOutcome::Resolved);
    batch.outcomes.push((record.record_name.clone(), outcome));

    if unblocks {
        for child in pending::take_children(tx, &record.record_name)? {
            let name = child.record_name.clone();
            debug!(record = %name, parent = %record.record_name, "applying deferred record");
            let (outcomes, failed) = (batch.outcomes.len(), batch.failed.len());
            if let Err(err) = tx.savepoint(|tx| apply(tx, child, batch)) {
                warn!(record = %name, %err, "could not apply deferred record");
                batch.outcomes.truncate(outcomes);
                batch.failed.truncate(failed);
                batch.failed.push((name, err.to_string()));
            }
        }
    }
    Ok(())
}

fn apply_one(tx: &mut StoreTx<'_>, record: &IncomingRecord) -> SyncResult<ApplyOutcome> {
    let Some(table) = tx.schema().shared_table(record.record_type.as_str()) else {
        debug!(record_type = %record.record_type, record = %record.record_name, "ignoring unshared record type");
        return Ok(ApplyOutcome::Ignored);
    };
    let name = &record.record_name;
    if name.record_type() != &record.record_type {
        warn!(record = %name, record_type = %record.record_type, "record name does not match its type");
        return Ok(ApplyOutcome::Ignored);
    }

    let existing = identity::mapping_by_name(tx, name)?;
    let known = existing.as_ref().and_then(|m| m.last_known_remote_version);
    if !record.version.is_newer_than(known) {
        debug!(record = %name, incoming = %record.version, ?known, "dropping stale version");
        return Ok(ApplyOutcome::ConflictDropped);
    }

    if record.deleted {
        return apply_deletion(tx, table, name);
    }

    if let Some(mapping) = existing.as_ref().filter(|m| m.state == SyncState::Deleted) {
        info!(record = %name, "local deletion pending, keeping it over remote edit");
        identity::upsert_mapping(
            tx,
            &RecordMapping {
                last_known_remote_version: Some(record.version),
                ..mapping.clone()
            },
        )?;
        return Ok(ApplyOutcome::ConflictDropped);
    }

    let row = payload_row(table, record);
    let parent = tracker::parent_of(table, &row)?;
    if let Some(parent) = &parent {
        if !tx.exists(parent.record_type().as_str(), parent.id())? {
            pending::defer(tx, record, parent)?;
            return Ok(ApplyOutcome::Deferred {
                parent: parent.clone(),
            });
        }
    }

    let conflicted = existing.as_ref().is_some_and(RecordMapping::is_dirty);
    if conflicted {
        identity::set_state(tx, name, SyncState::ConflictDetected)?;
        info!(record = %name, version = %record.version, "remote change overrides unpushed local change");
        identity::set_state(tx, name, SyncState::Resolving)?;
    }

    tx.upsert(table.name, &row)?;
    let stored = tx.select(table.name, name.id())?.unwrap_or_default();
    check_row(table.name, stored)?;
    let local_version = existing.as_ref().map_or(0, |m| m.local_version);
    identity::upsert_mapping(
        tx,
        &RecordMapping {
            record_name: name.clone(),
            last_known_remote_version: Some(record.version),
            parent,
            state: SyncState::Synced,
            local_version,
            synced_local_version: local_version,
            push_attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        },
    )?;
    pending::discard(tx, name)?;

    Ok(if conflicted {
        ApplyOutcome::Resolved
    } else {
        ApplyOutcome::Applied
    })
}

fn apply_deletion(tx: &mut StoreTx<'_>, table: &SharedTable, name: &RecordName) -> SyncResult<ApplyOutcome> {
    let removed = tx.delete(table.name, name.id())?;
    identity::remove(tx, name)?;
    let detached = identity::detach_children(tx, name)?;
    sharing::forget_share(tx, name)?;
    let discarded = pending::discard_children(tx, name)?;
    pending::discard(tx, name)?;
    info!(record = %name, removed, detached, discarded, "applied remote deletion");
    Ok(ApplyOutcome::Deleted)
}

/// The full column set of the row described by `record`.
///
/// Declared columns missing from the payload are written as null, which
/// restores column defaults; undeclared fields are dropped.
fn payload_row(table: &SharedTable, record: &IncomingRecord) -> Row {
    let mut row = Row::new();
    for column in table.data_columns() {
        let value = record.payload.get(column).cloned().unwrap_or(Value::Null);
        row.insert(column.to_string(), value);
    }
    row.insert(
        table.primary_key.to_string(),
        Value::String(record.record_name.id().to_string()),
    );
    row
}
