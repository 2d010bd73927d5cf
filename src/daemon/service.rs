//! The daemon loop: tails the log and runs the Subscription Manager,
//! Delivery Engine, and Collision Detector continuously.
//!
//! Restart-safe by construction: subscriptions and the event cursor are
//! persisted, so a restart re-attaches to the store, replays the registry,
//! and resumes from the last observed event id.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::daemon::collision::CollisionDetector;
use crate::daemon::delivery::DeliveryEngine;
use crate::daemon::subscriptions::SubscriptionManager;
use crate::filter::Filter;
use crate::models::{
    Event, EventDraft, EventPayload, Instance, LifeAction, Notification, SenderKind,
};
use crate::persistence::{DaemonStateRepo, Database, EventStore, Order, SubscriptionRepo};
use crate::registry;
use crate::{GlobalConfig, Result};

/// Events processed per poll pass.
const BATCH_SIZE: u32 = 256;

/// Retained notification history (stats/debug only; notifications are an
/// at-least-once derived effect, not durable state).
const NOTIFICATION_HISTORY: usize = 1024;

/// Sender name used for daemon-generated system messages.
const SYSTEM_SENDER: &str = "[hcom]";

/// The long-running coordinating process.
pub struct Daemon {
    config: Arc<GlobalConfig>,
    store: EventStore,
    state: DaemonStateRepo,
    subscriptions: SubscriptionManager,
    delivery: DeliveryEngine,
    collision: CollisionDetector,
    registry_cache: BTreeMap<String, Instance>,
    notify_tx: broadcast::Sender<i64>,
    notifications: VecDeque<Notification>,
}

impl Daemon {
    /// Assemble a daemon over a connected database.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, db: Database) -> Self {
        let store = EventStore::new(db.clone());
        let (notify_tx, _) = broadcast::channel(256);
        Self {
            subscriptions: SubscriptionManager::new(store.clone(), SubscriptionRepo::new(db.clone())),
            delivery: DeliveryEngine::new(store.clone()),
            collision: CollisionDetector::new(
                config.collision_window_seconds,
                &config.delivery.file_write_contexts,
            ),
            state: DaemonStateRepo::new(db),
            registry_cache: BTreeMap::new(),
            notifications: VecDeque::new(),
            notify_tx,
            store,
            config,
        }
    }

    /// Broadcast sender signalling "new events observed up to id". The IPC
    /// wait handlers subscribe to this for prompt wake-ups.
    #[must_use]
    pub fn notify_sender(&self) -> broadcast::Sender<i64> {
        self.notify_tx.clone()
    }

    /// Run the reactive loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only for failures during startup replay;
    /// steady-state storage errors are logged and retried on the next pass.
    pub async fn run(mut self, ct: CancellationToken) -> Result<()> {
        let mut cursor = self.state.cursor().await?;

        // Replay the registry projection so delivery decisions start from
        // the full log, not just post-restart events.
        let mut filter = Filter::new();
        filter.push("type", "=status")?.push("type", "=life")?;
        let history = self.store.query(&filter, None, Order::Ascending).await?;
        self.registry_cache = registry::fold_events(history.iter());

        info!(
            cursor,
            instances = self.registry_cache.len(),
            "daemon loop started"
        );

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if ct.is_cancelled() {
                break;
            }

            match self.store.tail(cursor, &Filter::new(), BATCH_SIZE).await {
                Ok(batch) if !batch.is_empty() => {
                    for event in &batch {
                        cursor = event.id;
                        self.process(event).await;
                    }
                    if let Err(err) = self.state.set_cursor(cursor).await {
                        warn!(%err, "failed to persist daemon cursor");
                    }
                    let _ = self.notify_tx.send(cursor);
                    continue; // drain before sleeping
                }
                Ok(_) => {}
                Err(err) => {
                    error!(%err, "daemon tail query failed");
                }
            }

            tokio::select! {
                () = ct.cancelled() => break,
                () = tokio::time::sleep(poll) => {}
            }
        }

        if let Err(err) = self.state.set_cursor(cursor).await {
            warn!(%err, "failed to persist daemon cursor at shutdown");
        }
        info!(cursor, "daemon loop stopped");
        Ok(())
    }

    /// Process one event through every standing rule.
    ///
    /// Each stage is isolated: a bad event or failing stage is logged and
    /// never stops service to other instances.
    async fn process(&mut self, event: &Event) {
        if let Some(report) = self.collision.observe(event) {
            let text = format!(
                "@{} @{} collision: both wrote {} within {}s",
                report.first_writer,
                report.second_writer,
                report.file,
                self.config.collision_window_seconds,
            );
            info!(
                file = %report.file,
                first = %report.first_writer,
                second = %report.second_writer,
                "file collision detected"
            );
            let draft = EventDraft::message(SYSTEM_SENDER, text, SenderKind::System);
            if let Err(err) = self.store.append(&draft, self.config.append_retries).await {
                error!(%err, "failed to append collision notification");
            }
        }

        if let Some(life) = event.as_life() {
            if life.action == LifeAction::Ready {
                if let Some(batch_id) = life.batch_id.clone() {
                    let launcher = life.by.clone();
                    if let Err(err) = self.check_batch_completion(&launcher, &batch_id).await {
                        warn!(%err, batch_id, "batch completion check failed");
                    }
                }
            }
        }

        registry::apply_event(&mut self.registry_cache, event);

        match self.subscriptions.evaluate(event).await {
            Ok(notifications) => {
                for notification in notifications {
                    info!(
                        subscription = %notification.subscription_id,
                        owner = %notification.owner,
                        event_id = notification.event_id,
                        "subscription matched"
                    );
                    if self.notifications.len() >= NOTIFICATION_HISTORY {
                        self.notifications.pop_front();
                    }
                    self.notifications.push_back(notification);
                }
            }
            Err(err) => error!(%err, "subscription evaluation failed"),
        }

        match &event.payload {
            EventPayload::Message(_) => {
                match self.delivery.on_message(event, &self.registry_cache).await {
                    Ok(outcome) => {
                        if !outcome.delivered.is_empty() || !outcome.queued.is_empty() {
                            info!(
                                id = event.id,
                                delivered = ?outcome.delivered,
                                queued = ?outcome.queued,
                                "message routed"
                            );
                        }
                    }
                    Err(err) => error!(id = event.id, %err, "message routing failed"),
                }
            }
            EventPayload::Status(status) => {
                match self.delivery.on_status(&event.instance, status.val).await {
                    Ok(flushed) if !flushed.is_empty() => {
                        info!(instance = %event.instance, ?flushed, "deferred messages delivered");
                    }
                    Ok(_) => {}
                    Err(err) => error!(instance = %event.instance, %err, "deferred flush failed"),
                }
            }
            EventPayload::Life(life) => {
                if life.action == LifeAction::Stopped {
                    self.delivery.on_stopped(&event.instance);
                }
            }
        }
    }

    /// Notify a launcher once every instance in its batch is ready.
    ///
    /// Idempotent: the notice is skipped when a system message for the
    /// batch already exists.
    async fn check_batch_completion(&self, launcher: &str, batch_id: &str) -> Result<()> {
        let mut launched = Filter::new();
        launched
            .push("type", "=life")?
            .push("action", "=batch_launched")?
            .push("batch", &format!("={batch_id}"))?
            .push("agent", &format!("={launcher}"))?;
        let Some(launch_event) = self
            .store
            .query(&launched, Some(1), Order::Descending)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(());
        };
        let expected = launch_event
            .as_life()
            .and_then(|l| l.launched)
            .unwrap_or(0);
        if expected == 0 {
            return Ok(());
        }

        let mut ready = Filter::new();
        ready
            .push("type", "=life")?
            .push("action", "=ready")?
            .push("batch", &format!("={batch_id}"))?;
        let ready_events = self.store.query(&ready, None, Order::Ascending).await?;
        let mut names: Vec<String> = Vec::new();
        for event in &ready_events {
            if !names.contains(&event.instance) {
                names.push(event.instance.clone());
            }
        }
        if u32::try_from(names.len()).unwrap_or(u32::MAX) < expected {
            return Ok(());
        }

        let mut sent = Filter::new();
        sent.push("type", "=message")?
            .push("sender", "=system")?
            .push("text", &format!("batch: {batch_id}"))?;
        if !self.store.query(&sent, Some(1), Order::Descending).await?.is_empty() {
            return Ok(());
        }

        let text = format!(
            "@{launcher} All {expected} instances ready: {} (batch: {batch_id})",
            names.join(", ")
        );
        let draft = EventDraft::message(SYSTEM_SENDER, text, SenderKind::System);
        self.store.append(&draft, self.config.append_retries).await?;
        info!(batch_id, launcher, "batch ready notification sent");
        Ok(())
    }
}
