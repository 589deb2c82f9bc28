//! The local store: one SQLite file, one writer, explicit transactions.
//!
//! All writes go through [`LocalStore::execute`], which runs a closure inside
//! a single SQLite transaction. Row writes made through [`StoreTx`] fire the
//! registered [`RowTrigger`]s synchronously inside that same transaction, so
//! anything a trigger writes commits or rolls back together with the row that
//! caused it. Closures are synchronous: a transaction can never stay open
//! across an `.await`.

use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::migrations;
use crate::observe::{Observation, StoreChange};
use crate::shadow::{self, ShadowMaterializer};
use crate::trigger::{RowChange, RowEvent, RowTrigger, TriggerRegistry};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tasksync_model::{Row, SyncSchema, TableRecord};
use tasksync_types::EntityId;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Triggers writing rows that fire triggers again stop at this depth.
const MAX_TRIGGER_DEPTH: usize = 8;

/// Who initiated a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    /// A user action on this device.
    Local,
    /// A change received from the remote store.
    Remote,
}

/// Outcome of [`StoreTx::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(EntityId),
    Updated(EntityId),
}

impl Upsert {
    pub fn key(&self) -> EntityId {
        match self {
            Self::Inserted(key) | Self::Updated(key) => *key,
        }
    }
}

/// Transactional SQLite store holding shared, private and sync tables.
pub struct LocalStore {
    conn: Mutex<Connection>,
    schema: SyncSchema,
    triggers: RwLock<Arc<TriggerRegistry>>,
    changes: broadcast::Sender<StoreChange>,
}

impl LocalStore {
    /// Opens (or creates) the store file described by `config`.
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %config.path.display(), journal_mode = %mode, "opened store file");
        Self::from_connection(conn, config.change_buffer)
    }

    /// Opens a private in-memory store (for tests and demos).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, StoreConfig::default().change_buffer)
    }

    fn from_connection(mut conn: Connection, change_buffer: usize) -> StorageResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::migrate(&mut conn)?;

        let (changes, _) = broadcast::channel(change_buffer.max(1));
        let store = Self {
            conn: Mutex::new(conn),
            schema: SyncSchema::task_sharing(),
            triggers: RwLock::new(Arc::new(TriggerRegistry::new())),
            changes,
        };

        for private in store.schema.private_tables() {
            store.register_trigger(
                private.shadows,
                RowEvent::Inserted,
                Arc::new(ShadowMaterializer::new(private.clone())),
            );
        }

        let backfilled = store.execute(WriteOrigin::Local, |tx| -> StorageResult<usize> {
            let mut total = 0;
            for private in tx.schema().private_tables() {
                total += shadow::backfill(tx, private)?;
            }
            Ok(total)
        })?;
        if backfilled > 0 {
            info!(rows = backfilled, "materialized missing shadow rows");
        }

        Ok(store)
    }

    /// The table declarations this store was opened with.
    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    /// Binds a trigger to a table and event.
    ///
    /// Takes effect for transactions started after the call.
    pub fn register_trigger(&self, table: &str, event: RowEvent, trigger: Arc<dyn RowTrigger>) {
        debug!(table, %event, trigger = trigger.name(), "registering trigger");
        let mut guard = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut *guard).register(table, event, trigger);
    }

    /// Names of the triggers bound to a table and event.
    pub fn trigger_names(&self, table: &str, event: RowEvent) -> Vec<String> {
        self.current_triggers().names(table, event)
    }

    /// Runs `body` as one atomic unit of work.
    ///
    /// Commits if `body` returns `Ok`; rolls back if it returns `Err` or
    /// unwinds. Change subscribers are notified only after a commit.
    pub fn execute<T, E>(
        &self,
        origin: WriteOrigin,
        body: impl FnOnce(&mut StoreTx<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let triggers = self.current_triggers();
        let mut conn = self.lock();
        let mut tx = StoreTx {
            tx: conn.transaction().map_err(StorageError::from)?,
            origin,
            schema: &self.schema,
            triggers,
            touched: BTreeSet::new(),
            depth: 0,
            savepoints: 0,
        };

        match body(&mut tx) {
            Ok(value) => {
                let touched = tx.commit()?;
                drop(conn);
                self.notify(touched, origin);
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("rollback failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    /// Runs a read-only `body` against the last committed state.
    ///
    /// Reads share the writer connection, so they wait for any running
    /// transaction.
    pub fn read<T, E>(&self, body: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let triggers = self.current_triggers();
        let mut conn = self.lock();
        let tx = StoreTx {
            tx: conn.transaction().map_err(StorageError::from)?,
            origin: WriteOrigin::Local,
            schema: &self.schema,
            triggers,
            touched: BTreeSet::new(),
            depth: 0,
            savepoints: 0,
        };
        let result = body(&tx);
        tx.rollback()?;
        result
    }

    /// Subscribes to committed changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Re-runs `query` whenever one of `tables` changes.
    pub fn observe<T, F>(self: &Arc<Self>, tables: &[&str], query: F) -> Observation<T>
    where
        F: Fn(&StoreTx<'_>) -> StorageResult<T> + Send + Sync + 'static,
    {
        Observation::new(self, tables, query)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic inside a transaction rolls it back on drop, so the
        // connection behind a poisoned lock is still consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_triggers(&self) -> Arc<TriggerRegistry> {
        Arc::clone(&self.triggers.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn notify(&self, touched: BTreeSet<String>, origin: WriteOrigin) {
        if touched.is_empty() {
            return;
        }
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            tables: touched,
            origin,
        });
    }
}

/// An open transaction on the local store.
///
/// Mutating methods take `&mut self`; the read-only view handed out by
/// [`LocalStore::read`] only exposes the `&self` methods.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
    origin: WriteOrigin,
    schema: &'conn SyncSchema,
    triggers: Arc<TriggerRegistry>,
    touched: BTreeSet<String>,
    depth: usize,
    savepoints: usize,
}

impl<'conn> StoreTx<'conn> {
    /// Who initiated this transaction.
    pub fn origin(&self) -> WriteOrigin {
        self.origin
    }

    pub fn schema(&self) -> &'conn SyncSchema {
        self.schema
    }

    /// Raw access for tables outside the declared schema (sync bookkeeping).
    /// Writes made here do not fire triggers.
    pub fn sql(&self) -> &Connection {
        &self.tx
    }

    /// Tables written so far in this transaction.
    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    /// Runs `body` under a savepoint.
    ///
    /// If `body` fails, only its own writes are rolled back and the
    /// transaction stays usable.
    pub fn savepoint<T, E>(&mut self, body: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        self.savepoints += 1;
        let name = format!("sp_{}", self.savepoints);
        self.tx
            .execute_batch(&format!("SAVEPOINT {name}"))
            .map_err(StorageError::from)?;
        let touched = self.touched.clone();

        let result = body(self);
        let end = match result {
            Ok(_) => format!("RELEASE {name}"),
            Err(_) => {
                self.touched = touched;
                format!("ROLLBACK TO {name}; RELEASE {name}")
            }
        };
        self.tx.execute_batch(&end).map_err(StorageError::from)?;
        result
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Inserts a row and fires `Inserted` triggers.
    pub fn insert(&mut self, table: &str, row: &Row) -> StorageResult<EntityId> {
        let (columns, pk) = self.declared(table)?;
        check_columns(table, columns, row)?;
        let key = key_of(row, pk)?;
        let row = &with_canonical_key(row, pk, key);

        let names: Vec<String> = row.keys().map(|c| quote(c)).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names.join(", "),
            placeholders.join(", ")
        );
        self.tx
            .execute(&sql, params_from_iter(row.values().map(to_sql)))?;
        self.touched.insert(table.to_string());
        debug!(table, %key, origin = ?self.origin, "inserted row");

        let stored = self.select(table, key)?.unwrap_or_default();
        self.fire(table, RowEvent::Inserted, key, stored)?;
        Ok(key)
    }

    /// Inserts a row unless one with the same key exists.
    ///
    /// Returns whether a row was inserted; triggers fire only in that case.
    pub fn insert_if_absent(&mut self, table: &str, row: &Row) -> StorageResult<bool> {
        let (columns, pk) = self.declared(table)?;
        check_columns(table, columns, row)?;
        let key = key_of(row, pk)?;
        let row = &with_canonical_key(row, pk, key);

        let names: Vec<String> = row.keys().map(|c| quote(c)).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            quote(table),
            names.join(", "),
            placeholders.join(", ")
        );
        let inserted = self
            .tx
            .execute(&sql, params_from_iter(row.values().map(to_sql)))?
            > 0;
        if inserted {
            self.touched.insert(table.to_string());
            let stored = self.select(table, key)?.unwrap_or_default();
            self.fire(table, RowEvent::Inserted, key, stored)?;
        }
        Ok(inserted)
    }

    /// Replaces the supplied column set of an existing row and fires
    /// `Updated` triggers. Returns `false` if no row has that key.
    pub fn update(&mut self, table: &str, key: EntityId, row: &Row) -> StorageResult<bool> {
        let (columns, pk) = self.declared(table)?;
        check_columns(table, columns, row)?;
        if row.contains_key(pk) && key_of(row, pk)? != key {
            return Err(StorageError::InvalidData(format!(
                "primary key of {table} is immutable"
            )));
        }

        let assignments: Vec<(&String, &Value)> =
            row.iter().filter(|(column, _)| column.as_str() != pk).collect();
        let changed = if assignments.is_empty() {
            usize::from(self.exists(table, key)?)
        } else {
            let sets: Vec<String> = assignments
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{} = ?{}", quote(column), i + 1))
                .collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?{}",
                quote(table),
                sets.join(", "),
                quote(pk),
                assignments.len() + 1
            );
            let mut values: Vec<SqlValue> = assignments.iter().map(|(_, v)| to_sql(v)).collect();
            values.push(SqlValue::Text(key.to_string()));
            self.tx.execute(&sql, params_from_iter(values))?
        };
        if changed == 0 {
            return Ok(false);
        }

        self.touched.insert(table.to_string());
        debug!(table, %key, origin = ?self.origin, "updated row");
        let stored = self.select(table, key)?.unwrap_or_default();
        self.fire(table, RowEvent::Updated, key, stored)?;
        Ok(true)
    }

    /// Inserts the row, or updates it if its key already exists.
    pub fn upsert(&mut self, table: &str, row: &Row) -> StorageResult<Upsert> {
        let (_, pk) = self.declared(table)?;
        let key = key_of(row, pk)?;
        if self.exists(table, key)? {
            self.update(table, key, row)?;
            Ok(Upsert::Updated(key))
        } else {
            self.insert(table, row)?;
            Ok(Upsert::Inserted(key))
        }
    }

    /// Deletes a row and fires `Deleted` triggers with the row as it was.
    ///
    /// Declared foreign keys apply: shadows cascade, children are detached.
    pub fn delete(&mut self, table: &str, key: EntityId) -> StorageResult<bool> {
        let (_, pk) = self.declared(table)?;
        let Some(old) = self.select(table, key)? else {
            return Ok(false);
        };

        self.tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?1", quote(table), quote(pk)),
            [key.to_string()],
        )?;
        self.touched.insert(table.to_string());
        let dependents: Vec<&'static str> = self
            .schema
            .shadows_of(table)
            .map(|p| p.name)
            .chain(self.schema.children_of(table).map(|(t, _)| t.name))
            .collect();
        self.touched
            .extend(dependents.into_iter().map(str::to_string));
        debug!(table, %key, origin = ?self.origin, "deleted row");

        self.fire(table, RowEvent::Deleted, key, old)?;
        Ok(true)
    }

    pub fn insert_record<R: TableRecord>(&mut self, record: &R) -> StorageResult<()> {
        self.insert(R::TABLE, &record.to_row()?)?;
        Ok(())
    }

    pub fn update_record<R: TableRecord>(&mut self, record: &R) -> StorageResult<bool> {
        self.update(R::TABLE, record.key(), &record.to_row()?)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Loads one row by primary key.
    pub fn select(&self, table: &str, key: EntityId) -> StorageResult<Option<Row>> {
        let (columns, pk) = self.declared(table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            column_list(columns),
            quote(table),
            quote(pk)
        );
        self.tx
            .query_row(&sql, [key.to_string()], |r| read_row(r, columns))
            .optional()
            .map_err(Into::into)
    }

    /// Loads all rows whose `column` equals `value` (`null` matches `IS NULL`).
    pub fn select_where(&self, table: &str, column: &str, value: &Value) -> StorageResult<Vec<Row>> {
        let (columns, _) = self.declared(table)?;
        if !columns.contains(&column) {
            return Err(StorageError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        let (predicate, params) = if value.is_null() {
            (format!("{} IS NULL", quote(column)), Vec::new())
        } else {
            (format!("{} = ?1", quote(column)), vec![to_sql(value)])
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY rowid",
            column_list(columns),
            quote(table),
            predicate
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |r| read_row(r, columns))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Loads every row of a table in insertion order.
    pub fn select_all(&self, table: &str) -> StorageResult<Vec<Row>> {
        let (columns, _) = self.declared(table)?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            column_list(columns),
            quote(table)
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| read_row(r, columns))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn exists(&self, table: &str, key: EntityId) -> StorageResult<bool> {
        let (_, pk) = self.declared(table)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            quote(table),
            quote(pk)
        );
        Ok(self.tx.query_row(&sql, [key.to_string()], |r| r.get(0))?)
    }

    pub fn get<R: TableRecord>(&self, key: EntityId) -> StorageResult<Option<R>> {
        self.select(R::TABLE, key)?
            .map(R::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub fn all<R: TableRecord>(&self) -> StorageResult<Vec<R>> {
        self.select_all(R::TABLE)?
            .into_iter()
            .map(|row| R::from_row(row).map_err(Into::into))
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────

    fn declared(&self, table: &str) -> StorageResult<(&'static [&'static str], &'static str)> {
        match (self.schema.columns_of(table), self.schema.primary_key_of(table)) {
            (Some(columns), Some(pk)) => Ok((columns, pk)),
            _ => Err(StorageError::UnknownTable(table.to_string())),
        }
    }

    fn fire(&mut self, table: &str, event: RowEvent, key: EntityId, row: Row) -> StorageResult<()> {
        let hooks = self.triggers.hooks(table, event);
        if hooks.is_empty() {
            return Ok(());
        }
        if self.depth >= MAX_TRIGGER_DEPTH {
            return Err(StorageError::InvalidData(format!(
                "trigger recursion limit reached on {table}"
            )));
        }

        let change = RowChange {
            table: table.to_string(),
            event,
            key,
            row,
        };
        self.depth += 1;
        let mut result = Ok(());
        for hook in hooks {
            debug!(trigger = hook.name(), table, %event, %key, "firing trigger");
            result = hook.fire(self, &change);
            if result.is_err() {
                break;
            }
        }
        self.depth -= 1;
        result
    }

    fn commit(self) -> StorageResult<BTreeSet<String>> {
        let StoreTx { tx, touched, .. } = self;
        tx.commit()?;
        Ok(touched)
    }

    fn rollback(self) -> StorageResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_list(columns: &[&str]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn check_columns(table: &str, columns: &[&str], row: &Row) -> StorageResult<()> {
    match row.keys().find(|c| !columns.contains(&c.as_str())) {
        Some(column) => Err(StorageError::UnknownColumn {
            table: table.to_string(),
            column: column.clone(),
        }),
        None => Ok(()),
    }
}

fn key_of(row: &Row, pk: &str) -> StorageResult<EntityId> {
    let raw = row
        .get(pk)
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::InvalidData(format!("row has no {pk}")))?;
    Ok(EntityId::parse(raw)?)
}

/// Stores keys in the lowercase form `EntityId` displays.
fn with_canonical_key(row: &Row, pk: &str, key: EntityId) -> Row {
    let mut row = row.clone();
    row.insert(pk.to_string(), Value::String(key.to_string()));
    row
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn read_row(row: &rusqlite::Row<'_>, columns: &[&str]) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (index, column) in columns.iter().enumerate() {
        let value = match row.get_ref(index)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::from(b.to_vec()),
        };
        out.insert((*column).to_string(), value);
    }
    Ok(out)
}
