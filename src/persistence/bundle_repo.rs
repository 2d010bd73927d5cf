//! Bundle repository: immutable reference packages with lazy resolution.

use chrono::Utc;

use crate::models::{Bundle, BundleRefs, Event};
use crate::{AppError, Result};

use super::db::Database;
use super::event_store::EventStore;

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct BundleRow {
    id: String,
    title: String,
    description: String,
    refs: String,
    extends: Option<String>,
    created_by: String,
    created_at: String,
}

impl BundleRow {
    fn into_bundle(self) -> Result<Bundle> {
        let refs: BundleRefs = serde_json::from_str(&self.refs)
            .map_err(|e| AppError::Db(format!("invalid bundle refs: {e}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Bundle {
            id: self.id,
            title: self.title,
            description: self.description,
            refs,
            extends: self.extends,
            created_by: self.created_by,
            created_at,
        })
    }
}

/// Repository wrapper around `SQLite` for bundle records.
#[derive(Clone)]
pub struct BundleRepo {
    db: Database,
}

impl BundleRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a bundle record. Bundles are immutable; there is no update.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, bundle: &Bundle) -> Result<()> {
        let refs = serde_json::to_string(&bundle.refs)
            .map_err(|e| AppError::Db(format!("serialize bundle refs: {e}")))?;
        sqlx::query(
            "INSERT INTO bundles (id, title, description, refs, extends, created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&bundle.id)
        .bind(&bundle.title)
        .bind(&bundle.description)
        .bind(&refs)
        .bind(&bundle.extends)
        .bind(&bundle.created_by)
        .bind(bundle.created_at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Retrieve a bundle by id. Returns `Ok(None)` if absent — a dangling
    /// `extends` or message reference is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Bundle>> {
        let row: Option<BundleRow> = sqlx::query_as("SELECT * FROM bundles WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.map(BundleRow::into_bundle).transpose()
    }

    /// List all bundles, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Bundle>> {
        let rows: Vec<BundleRow> =
            sqlx::query_as("SELECT * FROM bundles ORDER BY created_at DESC, id")
                .fetch_all(&self.db)
                .await?;
        rows.into_iter().map(BundleRow::into_bundle).collect()
    }

    /// Resolve a bundle's event references against the live log.
    ///
    /// Walks the `extends` chain (DAG; a visited set guards against
    /// malformed cycles) and collects every referenced event that still
    /// exists. Ranges pointing at archived or missing ids yield nothing —
    /// empty, never an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` only when the root bundle itself is
    /// missing, `AppError::Db` for storage failures.
    pub async fn resolve_events(&self, store: &EventStore, id: &str) -> Result<Vec<Event>> {
        let root = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bundle {id}")))?;

        let mut visited = vec![root.id.clone()];
        let mut chain = vec![root];
        while let Some(parent_id) = chain
            .last()
            .and_then(|b| b.extends.clone())
            .filter(|p| !visited.contains(p))
        {
            visited.push(parent_id.clone());
            match self.get_by_id(&parent_id).await? {
                Some(parent) => chain.push(parent),
                None => break, // dangling parent: stop walking, keep what we have
            }
        }

        let mut events = Vec::new();
        for bundle in &chain {
            for range in &bundle.refs.events {
                let mut filter = crate::filter::Filter::new();
                filter.raw(format!("id BETWEEN {} AND {}", range.start, range.end));
                let mut chunk = store
                    .query(&filter, None, super::event_store::Order::Ascending)
                    .await?;
                events.append(&mut chunk);
            }
        }
        events.sort_by_key(|e| e.id);
        events.dedup_by_key(|e| e.id);
        Ok(events)
    }
}
