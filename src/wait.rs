//! Wait/Block coordinator: block the calling process until the next
//! matching event, across process boundaries.
//!
//! Prefers a daemon-assisted wait over IPC for prompt wake-ups; falls back
//! to short-interval polling of the store when no daemon is reachable
//! (reduced responsiveness, not failure). Cancellation is process
//! termination; polling holds no registered state to leak.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::daemon::ipc::{self, DaemonWaitReply};
use crate::filter::Filter;
use crate::models::Event;
use crate::persistence::EventStore;
use crate::{GlobalConfig, Result};

/// Outcome of a wait, distinguishable by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Waited {
    /// The first (lowest-id) event after the starting cursor that matched.
    Matched(Event),
    /// The timeout elapsed with nothing matching.
    TimedOut,
}

/// Cross-process blocking wait over the shared store.
pub struct WaitCoordinator<'a> {
    store: &'a EventStore,
    config: &'a GlobalConfig,
}

impl<'a> WaitCoordinator<'a> {
    /// Bind a coordinator to a store and config.
    #[must_use]
    pub fn new(store: &'a EventStore, config: &'a GlobalConfig) -> Self {
        Self { store, config }
    }

    /// Block until the first event after the current log head matches
    /// `filter`, or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` for an invalid filter (rejected before
    /// any blocking) or `AppError::Db` for storage failures.
    pub async fn wait(&self, filter: &Filter, timeout: Duration) -> Result<Waited> {
        let predicate = filter.compile()?;
        let after_id = self.store.max_event_id().await?;

        match ipc::client_wait(&self.config.ipc_name, &predicate, after_id, timeout).await {
            Ok(DaemonWaitReply::Matched(wire)) => {
                // Re-read the event from the store: the wire form is for
                // display, the store row is authoritative.
                if let Some(id) = wire.get("id").and_then(serde_json::Value::as_i64) {
                    if let Some(event) = self.store.get(id).await? {
                        return Ok(Waited::Matched(event));
                    }
                }
                // Daemon reply unusable; fall through to polling with
                // whatever time is left unaccounted — treat as timed out
                // rather than blocking twice.
                Ok(Waited::TimedOut)
            }
            Ok(DaemonWaitReply::TimedOut) => Ok(Waited::TimedOut),
            Err(err) => {
                debug!(%err, "daemon wait unavailable, polling store directly");
                self.wait_polling(filter, after_id, timeout).await
            }
        }
    }

    /// Direct polling implementation: query `id > after_id AND filter` on a
    /// short interval until a match or the deadline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for storage failures.
    pub async fn wait_polling(
        &self,
        filter: &Filter,
        after_id: i64,
        timeout: Duration,
    ) -> Result<Waited> {
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if let Some(event) = self.store.tail(after_id, filter, 1).await?.into_iter().next() {
                return Ok(Waited::Matched(event));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Waited::TimedOut);
            }
            tokio::time::sleep(deadline.saturating_duration_since(now).min(poll)).await;
        }
    }
}
