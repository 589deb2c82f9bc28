//! SQLite local store for tasksync.
//!
//! Holds the shared tables (synchronized rows), the private tables (per-device
//! shadows of shared rows) and the sync bookkeeping tables in one file.
//!
//! # Architecture
//!
//! - [`LocalStore`] serializes all writes through one connection; a write is a
//!   closure run inside a single transaction ([`LocalStore::execute`])
//! - [`RowTrigger`]s registered per table and event run inside the writing
//!   transaction, after the statement
//! - [`ShadowMaterializer`] is such a trigger: inserting a shared row creates
//!   its private shadow in the same transaction
//! - committed changes are broadcast as [`StoreChange`]s and drive
//!   [`Observation`]s
//! - schema migrations run automatically on open

mod config;
mod error;
mod migrations;
mod observe;
mod repository;
mod shadow;
mod store;
mod trigger;

pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use migrations::SCHEMA_VERSION;
pub use observe::{Observation, StoreChange};
pub use repository::{
    tasks_by_start_date, tasks_with_private_data, GroupRepository, PrivateTaskRepository,
    TaskRepository,
};
pub use shadow::ShadowMaterializer;
pub use store::{LocalStore, StoreTx, Upsert, WriteOrigin};
pub use trigger::{RowChange, RowEvent, RowTrigger, TriggerRegistry};
