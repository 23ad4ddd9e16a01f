//! Ideas board.

use serde::{Deserialize, Serialize};

use crate::record::{Collection, Dataset, ImageBlob, Record, RecordId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    #[default]
    New,
    Exploring,
    Planned,
    Done,
}

/// A captured idea for future work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "imageBlobRef", skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageBlob>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: IdeaStatus,
}

impl Idea {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            title: title.into(),
            description: String::new(),
            image: None,
            priority: Priority::default(),
            status: IdeaStatus::default(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl Record for Idea {
    const COLLECTION: Collection = Collection::Ideas;

    fn id(&self) -> RecordId {
        self.id
    }

    fn records(dataset: &Dataset) -> &Vec<Self> {
        &dataset.ideas
    }

    fn records_mut(dataset: &mut Dataset) -> &mut Vec<Self> {
        &mut dataset.ideas
    }

    fn image_slot(&mut self) -> Option<&mut Option<ImageBlob>> {
        Some(&mut self.image)
    }
}
