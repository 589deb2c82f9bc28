//! Sharing of a group, together with the tasks linked under it.

use crate::engine::{with_retry, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::identity;
use crate::transport::ShareMetadata;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tasksync_model::{Group, TableRecord};
use tasksync_storage::{StorageError, StoreTx, WriteOrigin};
use tasksync_types::{EntityId, RecordName};
use tracing::info;

/// A share as persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInvitation {
    pub root: RecordName,
    pub share_id: String,
    pub url: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Title shown to invitees.
pub fn share_title(group_name: &str) -> String {
    format!("Join '{group_name}'!")
}

pub struct SharingManager {
    engine: Arc<SyncEngine>,
}

impl SharingManager {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Shares a group. Returns the existing invitation if it is shared
    /// already.
    ///
    /// A group the remote has never seen is pushed first.
    pub async fn create_share(&self, group_id: EntityId) -> SyncResult<ShareInvitation> {
        let ctx = self.engine.context();
        let root = RecordName::new(Group::TABLE, group_id);
        if let Some(existing) = ctx.store.read(|tx| share_row(tx, &root))? {
            return Ok(existing);
        }

        let group: Group = ctx
            .store
            .read(|tx| tx.get::<Group>(group_id))?
            .ok_or_else(|| SyncError::UnknownRecord(root.to_string()))?;

        let on_remote = |mapping: Option<identity::RecordMapping>| {
            mapping.is_some_and(|m| m.last_known_remote_version.is_some())
        };
        if !on_remote(ctx.store.read(|tx| identity::mapping_by_name(tx, &root))?) {
            self.engine.push_record(&root).await?;
            if !on_remote(ctx.store.read(|tx| identity::mapping_by_name(tx, &root))?) {
                return Err(SyncError::Transport(format!("{root} could not be pushed")));
            }
        }

        let metadata = ShareMetadata {
            title: share_title(&group.name),
        };
        let transport = &ctx.transport;
        let handle = with_retry(&ctx.config, "share", || {
            transport.share(&root, metadata.clone())
        })
        .await?;

        let invitation = ctx
            .store
            .execute(WriteOrigin::Local, |tx| -> SyncResult<_> {
                tx.sql().execute(
                    "INSERT INTO sync_shares \
                         (root_record_name, root_record_type, share_id, url, title, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT (root_record_name) DO NOTHING",
                    params![
                        root.to_string(),
                        root.record_type().as_str(),
                        handle.share_id,
                        handle.url,
                        metadata.title,
                        handle.created_at.to_rfc3339(),
                    ],
                )?;
                share_row(tx, &root)?.ok_or_else(|| SyncError::UnknownRecord(root.to_string()))
            })?;
        info!(root = %root, share = %invitation.share_id, "group shared");
        Ok(invitation)
    }

    /// The invitation of a shared group.
    pub fn share_for(&self, group_id: EntityId) -> SyncResult<Option<ShareInvitation>> {
        let root = RecordName::new(Group::TABLE, group_id);
        self.engine.store().read(|tx| share_row(tx, &root))
    }

    /// Records covered by a share: the root and every record linked under it.
    pub fn members(&self, share: &ShareInvitation) -> SyncResult<Vec<RecordName>> {
        let children = self
            .engine
            .store()
            .read(|tx| identity::children_of(tx, &share.root))?;
        let mut members = vec![share.root.clone()];
        members.extend(children.into_iter().map(|m| m.record_name));
        Ok(members)
    }
}

fn share_row(tx: &StoreTx<'_>, root: &RecordName) -> SyncResult<Option<ShareInvitation>> {
    let found: Option<(String, String, String, String)> = tx
        .sql()
        .query_row(
            "SELECT share_id, url, title, created_at FROM sync_shares WHERE root_record_name = ?1",
            [root.to_string()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    found
        .map(|(share_id, url, title, created_at)| -> SyncResult<_> {
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StorageError::InvalidData(format!("created_at: {e}")))?
                .with_timezone(&Utc);
            Ok(ShareInvitation {
                root: root.clone(),
                share_id,
                url,
                title,
                created_at,
            })
        })
        .transpose()
}

/// Removes the local share row of a deleted root.
pub(crate) fn forget_share(tx: &StoreTx<'_>, root: &RecordName) -> SyncResult<bool> {
    let removed = tx.sql().execute(
        "DELETE FROM sync_shares WHERE root_record_name = ?1",
        [root.to_string()],
    )?;
    Ok(removed > 0)
}
