//! Small key/value store for daemon restart state (event cursor).

use sqlx::Row;

use crate::Result;

use super::db::Database;

/// The daemon's persisted event cursor key.
pub const CURSOR_KEY: &str = "daemon_cursor";

/// Repository for the `daemon_state` key/value table.
#[derive(Clone)]
pub struct DaemonStateRepo {
    db: Database,
}

impl DaemonStateRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Read a value. Returns `Ok(None)` if the key is unset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM daemon_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    /// Upsert a value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO daemon_state (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Read the persisted event cursor, 0 when never set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn cursor(&self) -> Result<i64> {
        Ok(self
            .get(CURSOR_KEY)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Persist the event cursor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn set_cursor(&self, cursor: i64) -> Result<()> {
        self.set(CURSOR_KEY, &cursor.to_string()).await
    }
}
