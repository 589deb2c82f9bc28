use serde::Serialize;

/// A foreign key from a shared table to its parent shared table.
///
/// Parent linkage is what makes a shareable unit: children follow their
/// parent record into a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParentLink {
    /// Column on the child table holding the parent's id.
    pub column: &'static str,
    /// Name of the parent shared table.
    pub table: &'static str,
}

/// A table whose rows are synchronized with the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedTable {
    pub name: &'static str,
    pub primary_key: &'static str,
    /// All columns, primary key included. Also the payload field names.
    pub columns: &'static [&'static str],
    pub parent: Option<ParentLink>,
}

impl SharedTable {
    /// Whether `column` is declared on this table.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Columns other than the primary key.
    pub fn data_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .copied()
            .filter(move |c| *c != self.primary_key)
    }
}

/// A local-only table shadowing a shared table 1:1.
///
/// Rows are keyed by the shadowed row's primary key and are never read by the
/// sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivateTable {
    pub name: &'static str,
    /// Primary key column, also the foreign key to the shadowed row.
    pub key_column: &'static str,
    pub columns: &'static [&'static str],
    /// The shared table this table shadows.
    pub shadows: &'static str,
}

impl PrivateTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }
}

/// Declares the shared and private partitions of the local store.
///
/// Shared tables are listed parents first; push order follows this order so
/// a parent always reaches the remote before its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSchema {
    shared: Vec<SharedTable>,
    private: Vec<PrivateTable>,
}

impl SyncSchema {
    /// Builds a schema from explicit table lists.
    pub fn new(shared: Vec<SharedTable>, private: Vec<PrivateTable>) -> Self {
        Self { shared, private }
    }

    /// The group/task schema: `user_groups` and `tasks` are shared,
    /// `private_tasks` shadows `tasks`.
    pub fn task_sharing() -> Self {
        Self::new(
            vec![
                SharedTable {
                    name: <crate::Group as crate::TableRecord>::TABLE,
                    primary_key: "id",
                    columns: &["id", "name", "description", "color"],
                    parent: None,
                },
                SharedTable {
                    name: <crate::Task as crate::TableRecord>::TABLE,
                    primary_key: "id",
                    columns: &["id", "title", "start_date", "end_date", "content", "group_id"],
                    parent: Some(ParentLink {
                        column: "group_id",
                        table: <crate::Group as crate::TableRecord>::TABLE,
                    }),
                },
            ],
            vec![PrivateTable {
                name: <crate::PrivateTaskState as crate::TableRecord>::TABLE,
                key_column: "task_id",
                columns: &["task_id", "completion_date"],
                shadows: <crate::Task as crate::TableRecord>::TABLE,
            }],
        )
    }

    pub fn shared_tables(&self) -> &[SharedTable] {
        &self.shared
    }

    pub fn private_tables(&self) -> &[PrivateTable] {
        &self.private
    }

    pub fn shared_table(&self, name: &str) -> Option<&SharedTable> {
        self.shared.iter().find(|t| t.name == name)
    }

    pub fn private_table(&self, name: &str) -> Option<&PrivateTable> {
        self.private.iter().find(|t| t.name == name)
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.shared_table(name).is_some()
    }

    /// Private tables that shadow `shared`.
    pub fn shadows_of<'a>(&'a self, shared: &'a str) -> impl Iterator<Item = &'a PrivateTable> + 'a {
        self.private.iter().filter(move |t| t.shadows == shared)
    }

    /// Shared tables whose parent is `table`, with the linking column.
    pub fn children_of<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a SharedTable, ParentLink)> + 'a {
        self.shared.iter().filter_map(move |t| match t.parent {
            Some(link) if link.table == table => Some((t, link)),
            _ => None,
        })
    }

    /// Position of a shared table in push order. Unknown tables sort last.
    pub fn push_rank(&self, name: &str) -> usize {
        self.shared
            .iter()
            .position(|t| t.name == name)
            .unwrap_or(usize::MAX)
    }

    /// Column list for any declared table.
    pub fn columns_of(&self, name: &str) -> Option<&'static [&'static str]> {
        self.shared_table(name)
            .map(|t| t.columns)
            .or_else(|| self.private_table(name).map(|t| t.columns))
    }

    /// Primary key column for any declared table.
    pub fn primary_key_of(&self, name: &str) -> Option<&'static str> {
        self.shared_table(name)
            .map(|t| t.primary_key)
            .or_else(|| self.private_table(name).map(|t| t.key_column))
    }
}

impl Default for SyncSchema {
    fn default() -> Self {
        Self::task_sharing()
    }
}
