//! Read-only subscriptions for the presentation layer.

use crate::error::{StorageError, StorageResult};
use crate::store::{LocalStore, StoreTx, WriteOrigin};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// Tables written by one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub tables: BTreeSet<String>,
    pub origin: WriteOrigin,
}

impl StoreChange {
    pub fn touches(&self, table: &str) -> bool {
        self.tables.contains(table)
    }
}

type Query<T> = Box<dyn Fn(&StoreTx<'_>) -> StorageResult<T> + Send + Sync>;

/// A query that is re-evaluated whenever one of its tables changes.
///
/// e.g. "all tasks ordered by start date", "private state of task X".
///
/// Does not keep the store alive.
pub struct Observation<T> {
    store: Weak<LocalStore>,
    tables: BTreeSet<String>,
    query: Query<T>,
    changes: broadcast::Receiver<StoreChange>,
}

impl<T> Observation<T> {
    pub(crate) fn new<F>(store: &Arc<LocalStore>, tables: &[&str], query: F) -> Self
    where
        F: Fn(&StoreTx<'_>) -> StorageResult<T> + Send + Sync + 'static,
    {
        let changes = store.subscribe();
        Self {
            store: Arc::downgrade(store),
            tables: tables.iter().map(|t| (*t).to_string()).collect(),
            query: Box::new(query),
            changes,
        }
    }

    /// Evaluates the query against the last committed state.
    pub fn current(&self) -> StorageResult<T> {
        let store = self.store.upgrade().ok_or(StorageError::Closed)?;
        store.read(|tx| (self.query)(tx))
    }

    /// Waits for the next commit touching an observed table and returns the
    /// fresh result. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<StorageResult<T>> {
        loop {
            match self.changes.recv().await {
                Ok(change) if change.tables.iter().any(|t| self.tables.contains(t)) => {
                    return Some(self.current());
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "observation lagged, re-querying");
                    return Some(self.current());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
