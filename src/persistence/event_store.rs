//! Append-only event store: the sole source of truth.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, warn};

use crate::filter::Filter;
use crate::models::{Event, EventDraft, EventPayload, EventType};
use crate::{AppError, Result};

use super::db::Database;
use super::schema;

/// Query ordering for event reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Oldest first (id ascending).
    Ascending,
    /// Newest first (id descending).
    Descending,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Durable, id-ordered log of typed events over `SQLite`.
#[derive(Clone)]
pub struct EventStore {
    db: Database,
}

impl EventStore {
    /// Wrap a connected pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying pool, for repositories sharing the connection.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Append an event: atomic, durable, assigns the next id.
    ///
    /// Contention is retried with linear backoff up to `retries` attempts —
    /// losing an append is worse than a brief stall.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` once retries are exhausted or for any
    /// non-contention failure.
    pub async fn append(&self, draft: &EventDraft, retries: u32) -> Result<i64> {
        let timestamp = Utc::now().to_rfc3339();
        let event_type = draft.payload.event_type().as_str();
        let data = draft.payload.to_json()?;

        let mut attempt: u32 = 0;
        loop {
            let result = sqlx::query(
                "INSERT INTO events (timestamp, type, instance, data) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&timestamp)
            .bind(event_type)
            .bind(&draft.instance)
            .bind(&data)
            .execute(&self.db)
            .await;

            match result {
                Ok(done) => {
                    let id = done.last_insert_rowid();
                    debug!(id, event_type, instance = %draft.instance, "event appended");
                    return Ok(id);
                }
                Err(err) if is_contention(&err) && attempt + 1 < retries => {
                    attempt += 1;
                    warn!(attempt, "append contention, retrying");
                    tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Query events through the flattened view.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` for invalid filters (before touching
    /// storage) or `AppError::Db` for query failures.
    pub async fn query(
        &self,
        filter: &Filter,
        limit: Option<u32>,
        order: Order,
    ) -> Result<Vec<Event>> {
        self.query_table("events_v", filter, limit, order).await
    }

    /// Query an archive slot (1 = most recent) with the identical grammar.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the slot does not exist.
    pub async fn query_archive(
        &self,
        slot: u32,
        filter: &Filter,
        limit: Option<u32>,
        order: Order,
    ) -> Result<Vec<Event>> {
        let archive_id = self.resolve_archive_slot(slot).await?;
        let view = format!("archive_{archive_id}_events_v");
        self.query_table(&view, filter, limit, order).await
    }

    /// Cursor-based tail: events with id strictly greater than `after_id`
    /// matching the filter, ascending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn tail(&self, after_id: i64, filter: &Filter, limit: u32) -> Result<Vec<Event>> {
        let predicate = filter.compile()?;
        let sql = format!(
            "SELECT id, timestamp, type, instance, data FROM events_v \
             WHERE id > {after_id} AND ({predicate}) ORDER BY id ASC LIMIT {limit}"
        );
        self.fetch_events(&sql).await
    }

    /// Highest id the store has ever assigned.
    ///
    /// Reads the `AUTOINCREMENT` sequence rather than `MAX(id)` so the
    /// cursor survives an archive/reset emptying the live table.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn max_event_id(&self) -> Result<i64> {
        // sqlite_sequence only materializes after the first AUTOINCREMENT
        // insert anywhere in the database; fall back to MAX(id) until then.
        let seq = sqlx::query(
            "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'events'), 0) AS seq",
        )
        .fetch_one(&self.db)
        .await;
        match seq {
            Ok(row) => Ok(row.get::<i64, _>("seq")),
            Err(_) => {
                let row = sqlx::query("SELECT COALESCE(MAX(id), 0) AS seq FROM events")
                    .fetch_one(&self.db)
                    .await?;
                Ok(row.get::<i64, _>("seq"))
            }
        }
    }

    /// Fetch one event by id. Returns `Ok(None)` if absent (dangling refs
    /// resolve to empty, never an error).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn get(&self, id: i64) -> Result<Option<Event>> {
        let sql =
            format!("SELECT id, timestamp, type, instance, data FROM events WHERE id = {id}");
        Ok(self.fetch_events(&sql).await?.into_iter().next())
    }

    /// Evaluate a rendered filter predicate against one event.
    ///
    /// Runs through SQL so subscription matching and store queries share
    /// identical semantics.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the predicate fails to execute (a
    /// malformed persisted subscription filter — callers isolate this).
    pub async fn matches_event(&self, event_id: i64, predicate: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM events_v WHERE id = {event_id} AND ({predicate}) LIMIT 1");
        let row = sqlx::query(&sql).fetch_optional(&self.db).await?;
        Ok(row.is_some())
    }

    /// Idempotently add a name to a message's `delivered_to` set.
    ///
    /// A single `UPDATE` with a containment guard, atomic under the store's
    /// write serialization, so concurrent re-delivery attempts never
    /// duplicate an entry. Returns `true` when the name was newly added.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on update failure.
    pub async fn mark_delivered(&self, event_id: i64, name: &str) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE events SET data = json_set(data, '$.delivered_to', \
                 json_insert(json_extract(data, '$.delivered_to'), '$[#]', ?1)) \
             WHERE id = ?2 AND type = 'message' \
               AND NOT EXISTS (SELECT 1 FROM json_each(json_extract(events.data, '$.delivered_to')) \
                               WHERE json_each.value = ?1)",
        )
        .bind(name)
        .bind(event_id)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Atomically move the live log to a read-only archive slot and reset
    /// the live log to empty. Returns the archive id.
    ///
    /// The frozen rows get their own flattened view so archives answer the
    /// identical filter grammar.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails (nothing is moved).
    pub async fn archive(&self) -> Result<i64> {
        let last_event_id = self.max_event_id().await?;
        let mut tx = self.db.begin().await?;

        let done = sqlx::query("INSERT INTO archives (archived_at, last_event_id) VALUES (?1, ?2)")
            .bind(Utc::now().to_rfc3339())
            .bind(last_event_id)
            .execute(&mut *tx)
            .await?;
        let archive_id = done.last_insert_rowid();

        let table = format!("archive_{archive_id}_events");
        sqlx::query(&format!("CREATE TABLE {table} AS SELECT * FROM events"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE VIEW {table}_v AS {}",
            schema::flatten_select(&table)
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM events").execute(&mut *tx).await?;

        tx.commit().await?;
        debug!(archive_id, last_event_id, "live log archived");
        Ok(archive_id)
    }

    /// Number of archive slots.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn archive_count(&self) -> Result<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM archives")
            .fetch_one(&self.db)
            .await?;
        let n: i64 = row.get("n");
        Ok(u32::try_from(n).unwrap_or(0))
    }

    /// Resolve an archive selector (1 = most recent) to an archive id.
    async fn resolve_archive_slot(&self, slot: u32) -> Result<i64> {
        if slot == 0 {
            return Err(AppError::Filter("archive selector starts at 1".into()));
        }
        let row = sqlx::query("SELECT id FROM archives ORDER BY id DESC LIMIT 1 OFFSET ?1")
            .bind(i64::from(slot - 1))
            .fetch_optional(&self.db)
            .await?;
        row.map(|r| r.get::<i64, _>("id"))
            .ok_or_else(|| AppError::NotFound(format!("archive slot {slot}")))
    }

    async fn query_table(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<u32>,
        order: Order,
    ) -> Result<Vec<Event>> {
        let predicate = filter.compile()?;
        let limit_clause = limit.map_or_else(String::new, |n| format!(" LIMIT {n}"));
        let sql = format!(
            "SELECT id, timestamp, type, instance, data FROM {table} \
             WHERE {predicate} ORDER BY id {}{limit_clause}",
            order.sql()
        );
        self.fetch_events(&sql).await
    }

    async fn fetch_events(&self, sql: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query(sql).fetch_all(&self.db).await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_event(&row) {
                Ok(event) => events.push(event),
                Err(err) => {
                    // A single corrupt row must not fail the whole read.
                    warn!(%err, "skipping corrupt event row");
                }
            }
        }
        Ok(events)
    }
}

/// Classify a sqlx error as transient write contention.
fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_lowercase();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
    let id: i64 = row.get("id");
    let timestamp: String = row.get("timestamp");
    let type_s: String = row.get("type");
    let instance: String = row.get("instance");
    let data: String = row.get("data");

    let event_type = EventType::parse(&type_s)?;
    let payload = EventPayload::from_json(event_type, &data)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|err| AppError::Db(format!("invalid timestamp on event {id}: {err}")))?
        .with_timezone(&Utc);

    Ok(Event {
        id,
        timestamp,
        instance,
        payload,
    })
}
