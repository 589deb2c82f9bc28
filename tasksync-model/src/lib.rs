//! Row model for tasksync.
//!
//! Defines the types every other layer depends on:
//! - [`Group`] and [`Task`]: rows of the shared (synced) tables
//! - [`PrivateTaskState`]: the local-only shadow attached 1:1 to a task
//! - [`SyncSchema`]: which tables are shared, which are private, and how
//!   they reference each other
//! - [`TableRecord`]: conversion between typed rows and column bags
//!
//! Creation goes through drafts ([`GroupDraft`], [`TaskDraft`]) that are fully
//! specified or defaulted; updates replace the whole column set of an
//! existing identity.

mod color;
mod group;
mod record;
mod schema;
mod task;

pub use color::Color;
pub use group::{Group, GroupDraft};
pub use record::{check_row, Row, TableRecord};
pub use schema::{ParentLink, PrivateTable, SharedTable, SyncSchema};
pub use task::{PrivateTaskState, Task, TaskDraft, TaskWithPrivateData};
