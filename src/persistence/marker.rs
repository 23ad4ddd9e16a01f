//! The last-save marker shared by all views of the same data.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one open view (process, window) of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(Uuid);

impl ViewId {
    /// Creates a fresh view identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Written to the local store after every save so other views notice it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMarker {
    pub saved_at: DateTime<Utc>,
    pub view: ViewId,
    /// Per-view save counter; distinguishes two saves in the same millisecond.
    pub sequence: u64,
    /// True when the save only reached the local store.
    pub degraded: bool,
}

impl SaveMarker {
    #[must_use]
    pub fn new(view: ViewId, sequence: u64, degraded: bool) -> Self {
        Self {
            saved_at: Utc::now(),
            view,
            sequence,
            degraded,
        }
    }

    /// Parses a stored marker; `None` if the value is not a marker.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_parse() {
        let marker = SaveMarker::new(ViewId::new(), 3, false);
        let text = serde_json::to_string(&marker).unwrap();
        assert!(text.contains("savedAt"));
        assert_eq!(SaveMarker::parse(&text), Some(marker));
        assert_eq!(SaveMarker::parse("1700000000000"), None);
    }

    #[test]
    fn test_view_ids_are_unique() {
        assert_ne!(ViewId::new(), ViewId::new());
    }
}
