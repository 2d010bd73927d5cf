//! Bundle model: immutable reference packages over events, files, and
//! transcript ranges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive event-id range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRange {
    /// First event id in the range.
    pub start: i64,
    /// Last event id in the range.
    pub end: i64,
}

/// A transcript slice reference: line range plus what it shows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptRef {
    /// First line of the slice.
    pub start: u64,
    /// Last line of the slice.
    pub end: u64,
    /// What the slice contains.
    #[serde(default)]
    pub detail: String,
}

/// The reference sets a bundle carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleRefs {
    /// Event-id ranges. May dangle after an archive/reset.
    #[serde(default)]
    pub events: Vec<EventRange>,
    /// File paths.
    #[serde(default)]
    pub files: Vec<String>,
    /// Transcript slices.
    #[serde(default)]
    pub transcript: Vec<TranscriptRef>,
}

/// An immutable, named reference package. Bundles form a DAG via `extends`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bundle {
    /// Identifier, `bndl-` plus a UUID.
    pub id: String,
    /// Short human title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Referenced material.
    #[serde(default)]
    pub refs: BundleRefs,
    /// Parent bundle this one extends. May dangle; resolution yields empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Creator instance name.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Bundle {
    /// Construct a bundle with a generated identifier.
    #[must_use]
    pub fn new(
        title: String,
        description: String,
        refs: BundleRefs,
        extends: Option<String>,
        created_by: String,
    ) -> Self {
        Self {
            id: format!("bndl-{}", Uuid::new_v4()),
            title,
            description,
            refs,
            extends,
            created_by,
            created_at: Utc::now(),
        }
    }
}
