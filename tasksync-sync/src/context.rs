use crate::config::SyncConfig;
use crate::transport::RemoteTransport;
use std::sync::Arc;
use tasksync_storage::LocalStore;

/// Everything a sync component needs, passed explicitly to constructors.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<LocalStore>,
    pub transport: Arc<dyn RemoteTransport>,
    pub config: SyncConfig,
}

impl SyncContext {
    pub fn new(
        store: Arc<LocalStore>,
        transport: Arc<dyn RemoteTransport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }
}
