//! Append-only activity log.
//!
//! Entries are written once and never updated; listing is ordered by
//! timestamp with insertion order breaking ties.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use quillsync_core::{ActivityAction, ActivityEntry, DocumentId, StoreError};

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: i64,
    document_id: String,
    actor_id: String,
    action: String,
    details: String,
    at: String,
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::TransientIo(e.to_string())
}

fn hydrate_entry(row: ActivityRow) -> Result<ActivityEntry, StoreError> {
    Ok(ActivityEntry {
        id: row.id,
        document_id: row.document_id.parse().map_err(|_| {
            StoreError::TransientIo(format!("bad document id '{}'", row.document_id))
        })?,
        actor_id: row.actor_id,
        action: ActivityAction::parse(&row.action)
            .ok_or_else(|| StoreError::TransientIo(format!("bad action '{}'", row.action)))?,
        details: serde_json::from_str(&row.details)
            .map_err(|e| StoreError::TransientIo(format!("bad details: {}", e)))?,
        at: DateTime::parse_from_rfc3339(&row.at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::TransientIo(format!("bad timestamp '{}': {}", row.at, e)))?,
    })
}

/// Repository for activity rows.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    pool: SqlitePool,
}

impl ActivityLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends one entry. The document must exist (FK).
    pub async fn append(
        &self,
        document_id: DocumentId,
        actor_id: &str,
        action: ActivityAction,
        details: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let details = serde_json::to_string(details)
            .map_err(|e| StoreError::Invalid(format!("unserializable details: {}", e)))?;

        sqlx::query(
            "INSERT INTO activity (document_id, actor_id, action, details, at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(document_id.to_string())
        .bind(actor_id)
        .bind(action.as_str())
        .bind(&details)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    /// Lists entries for a document, oldest first.
    pub async fn list(
        &self,
        document_id: DocumentId,
        limit: u32,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT * FROM activity WHERE document_id = ? ORDER BY at, id LIMIT ?",
        )
        .bind(document_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(hydrate_entry).collect()
    }
}
