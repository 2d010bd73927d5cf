//! Subscription model: a standing filter owned by one instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A persistent (owner, filter) pair evaluated against every new event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    /// Identifier, `sub-` plus a short content hash.
    pub id: String,
    /// Owning instance (or external caller name).
    pub owner: String,
    /// Rendered SQL predicate over the flattened event view. Validated at
    /// subscribe time; re-validated defensively before evaluation.
    pub filter_sql: String,
    /// Self-remove after the first match.
    pub once: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Evaluation cursor: matches are only reported for events with a
    /// higher id, so a daemon restart never replays old matches.
    pub last_event_id: i64,
}

impl Subscription {
    /// Construct a subscription with a derived id and a starting cursor.
    #[must_use]
    pub fn new(owner: String, filter_sql: String, once: bool, last_event_id: i64) -> Self {
        let created_at = Utc::now();
        let digest = Sha256::digest(format!(
            "{owner}{filter_sql}{}",
            created_at.timestamp_micros()
        ));
        // Four hex digits match the id width agents actually type.
        let short = digest
            .iter()
            .take(2)
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Self {
            id: format!("sub-{short}"),
            owner,
            filter_sql,
            once,
            created_at,
            last_event_id,
        }
    }
}

/// A match produced by subscription evaluation.
///
/// Notifications are a derived, at-least-once side effect — they are queued
/// for the owner in daemon memory, never written back to the log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    /// Subscription that matched.
    pub subscription_id: String,
    /// Owner to notify.
    pub owner: String,
    /// Matching event id.
    pub event_id: i64,
}
