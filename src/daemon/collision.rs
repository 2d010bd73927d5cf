//! Collision detector: a standing rule over file-write status events.
//!
//! Keeps a per-file map of the last writer. A write to a mapped file by a
//! different instance within the window is a collision; the entry then
//! resets to the new writer, so a later third write collides against the
//! new writer's window rather than chaining against a stale one.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::Event;

/// One detected collision, reported to both writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionReport {
    /// The contested file path.
    pub file: String,
    /// Earlier writer in the pair.
    pub first_writer: String,
    /// Later writer in the pair.
    pub second_writer: String,
    /// Event id of the later write.
    pub event_id: i64,
}

struct LastWriter {
    instance: String,
    event_id: i64,
    timestamp: DateTime<Utc>,
}

/// Daemon-local collision state. Not persisted; rebuilt by the daemon loop
/// as events stream past.
pub struct CollisionDetector {
    window_seconds: i64,
    contexts: HashSet<String>,
    files: HashMap<String, LastWriter>,
}

impl CollisionDetector {
    /// Create a detector for the given window and file-write contexts.
    #[must_use]
    pub fn new(window_seconds: u64, contexts: &[String]) -> Self {
        Self {
            window_seconds: i64::try_from(window_seconds).unwrap_or(20),
            contexts: contexts.iter().cloned().collect(),
            files: HashMap::new(),
        }
    }

    /// Observe one event; returns a report when it completes a collision
    /// pair.
    ///
    /// Event-id order is the authoritative sequencing: an event that
    /// arrives with an id at or below the mapped entry's id is a replay and
    /// is ignored. Timestamps are consulted only for the window comparison
    /// itself.
    pub fn observe(&mut self, event: &Event) -> Option<CollisionReport> {
        let status = event.as_status()?;
        if !self.contexts.contains(&status.context) {
            return None;
        }
        let file = status.detail.as_deref()?.trim();
        if file.is_empty() {
            return None;
        }

        let report = match self.files.get(file) {
            Some(prev) if prev.event_id >= event.id => return None,
            Some(prev)
                if prev.instance != event.instance
                    && (event.timestamp - prev.timestamp).num_seconds().abs()
                        < self.window_seconds =>
            {
                Some(CollisionReport {
                    file: file.to_owned(),
                    first_writer: prev.instance.clone(),
                    second_writer: event.instance.clone(),
                    event_id: event.id,
                })
            }
            _ => None,
        };

        // Whether or not this write collided, it becomes the file's last
        // writer and the window restarts from here.
        self.files.insert(
            file.to_owned(),
            LastWriter {
                instance: event.instance.clone(),
                event_id: event.id,
                timestamp: event.timestamp,
            },
        );

        report
    }

    /// Number of files currently tracked.
    #[must_use]
    pub fn tracked_files(&self) -> usize {
        self.files.len()
    }
}
