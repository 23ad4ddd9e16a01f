//! Portfolio gallery photos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, Dataset, ImageBlob, Record, RecordId};

/// A photo in the portfolio gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPhoto {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "imageBlobRef", skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageBlob>,
    pub date_added: DateTime<Utc>,
}

impl GalleryPhoto {
    /// Creates a photo entry added now.
    #[must_use]
    pub fn new(title: impl Into<String>, image: ImageBlob) -> Self {
        Self {
            id: RecordId::new(),
            title: title.into(),
            description: String::new(),
            image: Some(image),
            date_added: Utc::now(),
        }
    }
}

impl Record for GalleryPhoto {
    const COLLECTION: Collection = Collection::Gallery;

    fn id(&self) -> RecordId {
        self.id
    }

    fn records(dataset: &Dataset) -> &Vec<Self> {
        &dataset.gallery
    }

    fn records_mut(dataset: &mut Dataset) -> &mut Vec<Self> {
        &mut dataset.gallery
    }

    fn image_slot(&mut self) -> Option<&mut Option<ImageBlob>> {
        Some(&mut self.image)
    }
}
