//! Instance registry: a derived view over the event log.
//!
//! Status is never stored independently — it is a pure function of the most
//! recent status/life event per instance, so two readers of the same log
//! prefix always agree. Staleness (`inactive`) is a read-time projection
//! applied on top of the fold, never a log entry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::StalenessConfig;
use crate::models::{Event, EventPayload, Instance, LifeAction, StatusVal, Tool};
use crate::persistence::{EventStore, Order};
use crate::Result;

/// Fold an id-ordered event sequence into the registry map.
///
/// Rules (a Moore machine keyed on the latest event, not a transition
/// table):
/// - `life:created` establishes the instance at `listening`, replacing any
///   stopped prior incarnation of the name.
/// - any `status` event sets status unconditionally while the instance is
///   live.
/// - `life:stopped` is terminal: later status events for the name are
///   ignored, so a racing final status write cannot resurrect the instance.
/// - status events for names never created are ignored.
#[must_use]
pub fn fold_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> BTreeMap<String, Instance> {
    let mut registry: BTreeMap<String, Instance> = BTreeMap::new();
    for event in events {
        apply_event(&mut registry, event);
    }
    registry
}

/// Apply a single event to the registry map — the per-event step of
/// [`fold_events`], exposed so the daemon can maintain its cache
/// incrementally.
pub fn apply_event(registry: &mut BTreeMap<String, Instance>, event: &Event) {
    match &event.payload {
        EventPayload::Life(life) => match life.action {
            LifeAction::Created => {
                registry.insert(
                    event.instance.clone(),
                    Instance {
                        name: event.instance.clone(),
                        tag: life.tag.clone(),
                        tool: life.tool.as_deref().map_or(Tool::Claude, Tool::parse_lossy),
                        status: StatusVal::Listening,
                        status_context: "new".into(),
                        status_detail: None,
                        status_time: event.timestamp,
                        parent_name: life.parent_name.clone(),
                        directory: life.directory.clone(),
                        session_id: life.session_id.clone(),
                        created_at: event.timestamp,
                        stopped: false,
                    },
                );
            }
            LifeAction::Ready => {
                if let Some(entry) = registry.get_mut(&event.instance) {
                    if !entry.stopped {
                        entry.status_time = event.timestamp;
                    }
                }
            }
            LifeAction::Stopped => {
                if let Some(entry) = registry.get_mut(&event.instance) {
                    entry.stopped = true;
                    entry.status_time = event.timestamp;
                }
            }
            LifeAction::BatchLaunched => {}
        },
        EventPayload::Status(status) => {
            if let Some(entry) = registry.get_mut(&event.instance) {
                if !entry.stopped {
                    entry.status = status.val;
                    entry.status_context.clone_from(&status.context);
                    entry.status_detail.clone_from(&status.detail);
                    entry.status_time = event.timestamp;
                }
            }
        }
        EventPayload::Message(_) => {}
    }
}

/// Apply the staleness projection: live instances silent past their window
/// are shown `inactive` with a `stale:<prev>` context.
///
/// `listening` uses the tighter heartbeat window; `active`/`blocked` use
/// the longer activity window.
pub fn project_staleness(
    registry: &mut BTreeMap<String, Instance>,
    now: DateTime<Utc>,
    staleness: &StalenessConfig,
) {
    for entry in registry.values_mut() {
        if entry.stopped || entry.status == StatusVal::Inactive {
            continue;
        }
        let age = (now - entry.status_time).num_seconds().max(0);
        let window = match entry.status {
            StatusVal::Listening => i64::try_from(staleness.listening_seconds).unwrap_or(i64::MAX),
            _ => i64::try_from(staleness.active_seconds).unwrap_or(i64::MAX),
        };
        if age > window {
            entry.status_context = format!("stale:{}", entry.status.as_str());
            entry.status = StatusVal::Inactive;
        }
    }
}

/// Store-backed registry reader.
#[derive(Clone)]
pub struct InstanceRegistry {
    store: EventStore,
}

impl InstanceRegistry {
    /// Wrap an event store.
    #[must_use]
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    /// Compute the registry from the full log, without staleness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, Instance>> {
        let mut filter = crate::filter::Filter::new();
        filter.push("type", "=status")?.push("type", "=life")?;
        let events = self.store.query(&filter, None, Order::Ascending).await?;
        Ok(fold_events(events.iter()))
    }

    /// Compute the registry with the staleness projection applied at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn snapshot_projected(
        &self,
        now: DateTime<Utc>,
        staleness: &StalenessConfig,
    ) -> Result<BTreeMap<String, Instance>> {
        let mut registry = self.snapshot().await?;
        project_staleness(&mut registry, now, staleness);
        Ok(registry)
    }
}
