//! Schema migrations, tracked through `PRAGMA user_version`.

use crate::error::{StorageError, StorageResult};
use rusqlite::Connection;
use tracing::info;

/// Ordered migrations. Index + 1 is the schema version after applying it.
const MIGRATIONS: &[&str] = &[
    // v1: shared, private and sync tables.
    r#"
    CREATE TABLE user_groups (
        "id" TEXT PRIMARY KEY NOT NULL,
        "name" TEXT NOT NULL ON CONFLICT REPLACE DEFAULT 'UNKNOWN',
        "description" TEXT,
        "color" INTEGER NOT NULL ON CONFLICT REPLACE DEFAULT 1251602431
    ) STRICT;

    CREATE TABLE tasks (
        "id" TEXT PRIMARY KEY NOT NULL,
        "title" TEXT NOT NULL ON CONFLICT REPLACE DEFAULT '',
        "start_date" TEXT NOT NULL ON CONFLICT REPLACE DEFAULT '1970-01-01T00:00:00Z',
        "end_date" TEXT NOT NULL ON CONFLICT REPLACE DEFAULT '9999-12-31T00:00:00Z',
        "content" TEXT NOT NULL ON CONFLICT REPLACE DEFAULT '',
        "group_id" TEXT REFERENCES user_groups("id") ON DELETE SET NULL
    ) STRICT;
    CREATE INDEX tasks_group_id ON tasks("group_id");

    CREATE TABLE private_tasks (
        "task_id" TEXT PRIMARY KEY NOT NULL REFERENCES tasks("id") ON DELETE CASCADE,
        "completion_date" TEXT
    ) STRICT;

    CREATE TABLE sync_metadata (
        record_type TEXT NOT NULL,
        local_key TEXT NOT NULL,
        record_name TEXT NOT NULL,
        last_known_remote_version INTEGER,
        parent_record_type TEXT,
        parent_record_name TEXT,
        sync_state TEXT NOT NULL DEFAULT 'local_only',
        local_version INTEGER NOT NULL DEFAULT 0,
        synced_local_version INTEGER NOT NULL DEFAULT 0,
        push_attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (record_type, local_key)
    ) STRICT;
    CREATE UNIQUE INDEX sync_metadata_record_name ON sync_metadata(record_name);
    CREATE INDEX sync_metadata_parent ON sync_metadata(parent_record_name);

    CREATE TABLE sync_pending_applications (
        record_name TEXT PRIMARY KEY NOT NULL,
        record_type TEXT NOT NULL,
        parent_record_name TEXT NOT NULL,
        payload TEXT NOT NULL,
        version INTEGER NOT NULL,
        received_at TEXT NOT NULL
    ) STRICT;
    CREATE INDEX sync_pending_parent ON sync_pending_applications(parent_record_name);

    CREATE TABLE sync_shares (
        root_record_name TEXT PRIMARY KEY NOT NULL,
        root_record_type TEXT NOT NULL,
        share_id TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL
    ) STRICT;
    "#,
];

/// Latest schema version known to this build.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Brings the database up to [`SCHEMA_VERSION`].
pub(crate) fn migrate(conn: &mut Connection) -> StorageResult<()> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "database schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| StorageError::Migration(format!("v{version}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "applied store migration");
    }
    Ok(())
}
