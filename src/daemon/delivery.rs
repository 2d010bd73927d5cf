//! Delivery engine: decides which live instances receive a message and
//! when.
//!
//! Targeting is independent of subscriptions. Timing depends on the
//! target's projected status: `listening` targets are delivered
//! immediately; `active` targets are deferred to their next tool-call
//! boundary (a status event from them) so a message never lands mid
//! tool-call; `blocked` targets stay queued until they unblock.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::filter::any_target_matches;
use crate::models::{Event, Instance, MessagePayload, Scope, StatusVal};
use crate::persistence::EventStore;
use crate::Result;

/// Result of routing one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Targets marked delivered immediately.
    pub delivered: Vec<String>,
    /// Targets queued for a later safe point.
    pub queued: Vec<String>,
}

/// Resolve the target set for a message against a registry snapshot.
///
/// Broadcast reaches every live instance except the sender; mention scope
/// reaches each instance matched by the mention tokens (see
/// [`crate::filter::target_matches`]). An unknown mention simply matches
/// nobody — the message stays appended with an empty delivery set.
#[must_use]
pub fn resolve_targets(
    msg: &MessagePayload,
    registry: &BTreeMap<String, Instance>,
) -> Vec<String> {
    registry
        .values()
        .filter(|instance| instance.is_live())
        .filter(|instance| instance.name != msg.from)
        .filter(|instance| match msg.scope {
            Scope::Broadcast => true,
            Scope::Mentions => {
                any_target_matches(&msg.mentions, &instance.name, instance.tag.as_deref())
            }
        })
        .map(|instance| instance.name.clone())
        .collect()
}

/// Routes messages and holds the per-instance deferred queue.
///
/// The queue is daemon-local; `delivered_to` in the log is the durable
/// record, and marking is idempotent, so a daemon restart at worst retries
/// a delivery (at-least-once).
pub struct DeliveryEngine {
    store: EventStore,
    pending: HashMap<String, Vec<i64>>,
}

impl DeliveryEngine {
    /// Wrap an event store.
    #[must_use]
    pub fn new(store: EventStore) -> Self {
        Self {
            store,
            pending: HashMap::new(),
        }
    }

    /// Route one message event. Listening targets are marked delivered now;
    /// everyone else is queued.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if marking delivery fails.
    pub async fn on_message(
        &mut self,
        event: &Event,
        registry: &BTreeMap<String, Instance>,
    ) -> Result<DeliveryOutcome> {
        let Some(msg) = event.as_message() else {
            return Ok(DeliveryOutcome::default());
        };

        let mut outcome = DeliveryOutcome::default();
        for target in resolve_targets(msg, registry) {
            let status = registry.get(&target).map(|i| i.status);
            if status == Some(StatusVal::Listening) {
                self.store.mark_delivered(event.id, &target).await?;
                outcome.delivered.push(target);
            } else {
                self.pending.entry(target.clone()).or_default().push(event.id);
                outcome.queued.push(target);
            }
        }

        if outcome.delivered.is_empty() && outcome.queued.is_empty() {
            debug!(id = event.id, "message matched no live targets");
        }
        Ok(outcome)
    }

    /// React to a status event from an instance: any status report is a
    /// safe point, so queued messages flush — unless the instance reported
    /// `blocked`, which keeps its queue intact.
    ///
    /// Returns the event ids newly delivered to the instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if marking delivery fails.
    pub async fn on_status(&mut self, instance: &str, val: StatusVal) -> Result<Vec<i64>> {
        if val == StatusVal::Blocked {
            return Ok(Vec::new());
        }
        let Some(queued) = self.pending.remove(instance) else {
            return Ok(Vec::new());
        };

        let mut flushed = Vec::new();
        for event_id in queued {
            match self.store.mark_delivered(event_id, instance).await {
                Ok(true) => flushed.push(event_id),
                Ok(false) => {} // already delivered by an earlier pass
                Err(err) => {
                    warn!(event_id, instance, %err, "deferred delivery failed");
                }
            }
        }
        Ok(flushed)
    }

    /// Drop the deferred queue for a stopped instance.
    pub fn on_stopped(&mut self, instance: &str) {
        self.pending.remove(instance);
    }

    /// Pending queue depth for an instance (for stats).
    #[must_use]
    pub fn pending_for(&self, instance: &str) -> usize {
        self.pending.get(instance).map_or(0, Vec::len)
    }
}
