use crate::{Color, TableRecord};
use serde::{Deserialize, Serialize};
use tasksync_types::EntityId;

/// A user group: the root of a shareable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub color: Color,
}

impl TableRecord for Group {
    const TABLE: &'static str = "user_groups";

    fn key(&self) -> EntityId {
        self.id
    }
}

/// Values for a group that does not exist yet, or the replacement column
/// set for an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDraft {
    pub name: String,
    pub description: Option<String>,
    pub color: Color,
}

impl GroupDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        // Empty text means "no description".
        self.description = (!description.is_empty()).then_some(description);
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Materializes the draft under the given identity.
    pub fn into_group(self, id: EntityId) -> Group {
        Group {
            id,
            name: self.name,
            description: self.description,
            color: self.color,
        }
    }
}

impl Default for GroupDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            color: Color::DEFAULT,
        }
    }
}

impl From<&Group> for GroupDraft {
    fn from(group: &Group) -> Self {
        Self {
            name: group.name.clone(),
            description: group.description.clone(),
            color: group.color,
        }
    }
}
