//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `CREATE ... IF NOT EXISTS` — safe to re-run on every
//! startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table and view definitions to the connected database.
///
/// The `events` table uses `AUTOINCREMENT` so ids stay strictly increasing
/// and are never reused, even after an archive/reset empties the live log.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = format!(
        r"
CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT NOT NULL,
    type        TEXT NOT NULL CHECK(type IN ('message','status','life')),
    instance    TEXT NOT NULL,
    data        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
CREATE INDEX IF NOT EXISTS idx_events_instance ON events(instance);

CREATE TABLE IF NOT EXISTS subscriptions (
    id            TEXT PRIMARY KEY NOT NULL,
    owner         TEXT NOT NULL,
    filter_sql    TEXT NOT NULL,
    once          INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    last_event_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS bundles (
    id          TEXT PRIMARY KEY NOT NULL,
    title       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    refs        TEXT NOT NULL,
    extends     TEXT,
    created_by  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS archives (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    archived_at   TEXT NOT NULL,
    last_event_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS daemon_state (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE VIEW IF NOT EXISTS events_v AS {};
",
        flatten_select("events")
    );

    sqlx::raw_sql(&ddl).execute(pool).await?;
    Ok(())
}

/// Render the flattening `SELECT` that exposes the JSON payload as typed
/// `msg_*` / `status_*` / `life_*` columns.
///
/// Used for the live `events_v` view and for the per-archive views created
/// at reset time, so live and cold logs share one filter grammar.
#[must_use]
pub fn flatten_select(table: &str) -> String {
    format!(
        "SELECT
    id, timestamp, type, instance, data,
    json_extract(data, '$.from')         AS msg_from,
    json_extract(data, '$.text')         AS msg_text,
    json_extract(data, '$.scope')        AS msg_scope,
    json_extract(data, '$.sender_kind')  AS msg_sender_kind,
    json_extract(data, '$.delivered_to') AS msg_delivered_to,
    json_extract(data, '$.mentions')     AS msg_mentions,
    json_extract(data, '$.intent')       AS msg_intent,
    json_extract(data, '$.thread')       AS msg_thread,
    json_extract(data, '$.reply_to')     AS msg_reply_to,
    json_extract(data, '$.bundle_id')    AS msg_bundle_id,
    json_extract(data, '$.val')          AS status_val,
    json_extract(data, '$.context')      AS status_context,
    json_extract(data, '$.detail')       AS status_detail,
    json_extract(data, '$.action')       AS life_action,
    json_extract(data, '$.by')           AS life_by,
    json_extract(data, '$.batch_id')     AS life_batch_id,
    json_extract(data, '$.reason')       AS life_reason
FROM {table}"
    )
}
