//! Subscription manager: persistent (owner, filter) pairs evaluated against
//! every newly appended event.

use tracing::{debug, warn};

use crate::models::{Event, Notification, Subscription};
use crate::persistence::{EventStore, SubscriptionRepo};
use crate::{AppError, Result};

/// Creates, removes, and evaluates subscriptions.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: EventStore,
    repo: SubscriptionRepo,
}

impl SubscriptionManager {
    /// Wrap a store and its subscription repository.
    #[must_use]
    pub fn new(store: EventStore, repo: SubscriptionRepo) -> Self {
        Self { store, repo }
    }

    /// Register a subscription for `owner` over a rendered filter
    /// predicate. The predicate is test-executed (`LIMIT 0`) so malformed
    /// filters are rejected before they are persisted.
    ///
    /// The cursor starts at the current log head: a subscription only sees
    /// events appended after it was created.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` for a predicate that does not execute,
    /// `AppError::Db` for storage failures.
    pub async fn subscribe(
        &self,
        owner: &str,
        filter_sql: &str,
        once: bool,
    ) -> Result<Subscription> {
        self.validate_predicate(filter_sql).await?;
        let cursor = self.store.max_event_id().await?;
        let sub = Subscription::new(owner.to_owned(), filter_sql.to_owned(), once, cursor);
        self.repo.create(&sub).await?;
        debug!(id = %sub.id, owner, "subscription created");
        Ok(sub)
    }

    /// Remove a subscription by id. Returns `true` when it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure.
    pub async fn unsubscribe(&self, id: &str) -> Result<bool> {
        self.repo.delete(id).await
    }

    /// List all subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on storage failure.
    pub async fn list(&self) -> Result<Vec<Subscription>> {
        self.repo.list().await
    }

    /// Evaluate all live subscriptions against one newly appended event, in
    /// creation order. Each match yields one notification; `once`
    /// subscriptions self-remove after their first match.
    ///
    /// A filter that fails to execute is isolated: logged, its cursor
    /// advanced, service to other subscriptions continues.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only when the subscription list itself cannot
    /// be read.
    pub async fn evaluate(&self, event: &Event) -> Result<Vec<Notification>> {
        let mut notifications = Vec::new();

        for sub in self.repo.list().await? {
            if event.id <= sub.last_event_id {
                continue;
            }

            let matched = match self.store.matches_event(event.id, &sub.filter_sql).await {
                Ok(matched) => matched,
                Err(err) => {
                    warn!(id = %sub.id, %err, "subscription filter failed, skipping");
                    // Advance past the event anyway so a broken filter does
                    // not re-fail on every pass.
                    self.repo.update_cursor(&sub.id, event.id).await?;
                    continue;
                }
            };

            if matched {
                notifications.push(Notification {
                    subscription_id: sub.id.clone(),
                    owner: sub.owner.clone(),
                    event_id: event.id,
                });
                if sub.once {
                    self.repo.delete(&sub.id).await?;
                    continue;
                }
            }
            self.repo.update_cursor(&sub.id, event.id).await?;
        }

        Ok(notifications)
    }

    /// Test-execute a predicate with `LIMIT 0` against the flattened view.
    async fn validate_predicate(&self, filter_sql: &str) -> Result<()> {
        let sql = format!("SELECT 1 FROM events_v WHERE ({filter_sql}) LIMIT 0");
        sqlx::query(&sql)
            .fetch_all(self.store.db())
            .await
            .map_err(|err| AppError::Filter(format!("invalid filter: {err}")))?;
        Ok(())
    }
}
