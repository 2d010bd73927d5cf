//! Subscription repository for `SQLite` persistence.
//!
//! Subscriptions are persisted, not memory-only, so a daemon restart
//! resumes evaluation with no lost subscriptions.

use chrono::Utc;

use crate::models::Subscription;
use crate::{AppError, Result};

use super::db::Database;

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    owner: String,
    filter_sql: String,
    once: i64,
    created_at: String,
    last_event_id: i64,
}

impl SubscriptionRow {
    fn into_subscription(self) -> Result<Subscription> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Subscription {
            id: self.id,
            owner: self.owner,
            filter_sql: self.filter_sql,
            once: self.once != 0,
            created_at,
            last_event_id: self.last_event_id,
        })
    }
}

/// Repository wrapper around `SQLite` for subscription records.
#[derive(Clone)]
pub struct SubscriptionRepo {
    db: Database,
}

impl SubscriptionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new subscription record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, sub: &Subscription) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions (id, owner, filter_sql, once, created_at, last_event_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&sub.id)
        .bind(&sub.owner)
        .bind(&sub.filter_sql)
        .bind(i64::from(sub.once))
        .bind(sub.created_at.to_rfc3339())
        .bind(sub.last_event_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Retrieve a subscription by id. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    /// List all subscriptions in creation order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions ORDER BY created_at, id")
                .fetch_all(&self.db)
                .await?;
        rows.into_iter()
            .map(SubscriptionRow::into_subscription)
            .collect()
    }

    /// Remove a subscription. Returns `true` when a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM subscriptions WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Advance a subscription's evaluation cursor.
    ///
    /// The cursor only moves forward; a stale writer cannot rewind it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_cursor(&self, id: &str, last_event_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions SET last_event_id = ?1 \
             WHERE id = ?2 AND last_event_id < ?1",
        )
        .bind(last_event_id)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
