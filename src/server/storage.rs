//! Sqlite-backed document storage.
//!
//! The authoritative home of document rows and the compare-and-swap save:
//! an update only lands while the persisted `updated_at` still equals the
//! caller's baseline, otherwise the save fails with `StaleWrite` instead of
//! silently overwriting a concurrent edit.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use std::path::PathBuf;
use std::str::FromStr;

use quillsync_core::store::{DocumentPatch, NewDocument};
use quillsync_core::{
    Collaborator, DocContent, Document, DocumentId, Permission, StoreError, Visibility,
};

/// Initialize the database connection pool and run migrations.
pub async fn init_db(db_path: PathBuf) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    title: String,
    content: String,
    owner_id: String,
    visibility: String,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct CollaboratorRow {
    document_id: String,
    user_id: String,
    permission: String,
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::TransientIo(e.to_string())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::TransientIo(format!("bad timestamp '{}': {}", s, e)))
}

fn hydrate_document(row: DocumentRow) -> Result<Document, StoreError> {
    let id: DocumentId = row
        .id
        .parse()
        .map_err(|_| StoreError::TransientIo(format!("bad document id '{}'", row.id)))?;
    let content: DocContent = serde_json::from_str(&row.content)
        .map_err(|e| StoreError::TransientIo(format!("bad content for {}: {}", row.id, e)))?;
    let visibility = Visibility::parse(&row.visibility)
        .ok_or_else(|| StoreError::TransientIo(format!("bad visibility '{}'", row.visibility)))?;

    Ok(Document {
        id,
        title: row.title,
        content,
        owner_id: row.owner_id,
        visibility,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn hydrate_collaborator(row: CollaboratorRow) -> Result<Collaborator, StoreError> {
    Ok(Collaborator {
        document_id: row.document_id.parse().map_err(|_| {
            StoreError::TransientIo(format!("bad document id '{}'", row.document_id))
        })?,
        user_id: row.user_id,
        permission: Permission::parse(&row.permission).ok_or_else(|| {
            StoreError::TransientIo(format!("bad permission '{}'", row.permission))
        })?,
    })
}

fn can_read(doc: &Document, collaborators: &[Collaborator], user: &str) -> bool {
    doc.owner_id == user
        || doc.visibility == Visibility::Public
        || collaborators.iter().any(|c| c.user_id == user)
}

fn can_write(doc: &Document, collaborators: &[Collaborator], user: &str) -> bool {
    doc.owner_id == user
        || collaborators
            .iter()
            .any(|c| c.user_id == user && c.permission.can_edit())
}

/// `updated_at` must advance strictly per document or a concurrent save
/// landing within clock resolution would slip past the CAS check.
fn next_timestamp(after: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > after {
        now
    } else {
        after + Duration::milliseconds(1)
    }
}

/// Repository for document and collaborator rows.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_document(
        conn: &mut SqliteConnection,
        id: DocumentId,
    ) -> Result<Document, StoreError> {
        let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(conn)
            .await
            .map_err(db_error)?;
        row.map(hydrate_document)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    async fn fetch_collaborators(
        conn: &mut SqliteConnection,
        id: DocumentId,
    ) -> Result<Vec<Collaborator>, StoreError> {
        let rows: Vec<CollaboratorRow> =
            sqlx::query_as("SELECT * FROM collaborators WHERE document_id = ?")
                .bind(id.to_string())
                .fetch_all(conn)
                .await
                .map_err(db_error)?;
        rows.into_iter().map(hydrate_collaborator).collect()
    }

    /// Creates a document owned by `actor`.
    pub async fn create(&self, actor: &str, new: NewDocument) -> Result<Document, StoreError> {
        if new.title.trim().is_empty() {
            return Err(StoreError::Invalid("title must not be empty".into()));
        }

        let now = Utc::now();
        let doc = Document {
            id: DocumentId::new(),
            title: new.title,
            content: new.content,
            owner_id: actor.to_string(),
            visibility: new.visibility,
            created_at: now,
            updated_at: now,
        };

        let content = serde_json::to_string(&doc.content)
            .map_err(|e| StoreError::Invalid(format!("unserializable content: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content, owner_id, visibility, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doc.id.to_string())
        .bind(&doc.title)
        .bind(&content)
        .bind(&doc.owner_id)
        .bind(doc.visibility.as_str())
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(doc)
    }

    /// Loads a document, applying the read-access rules.
    pub async fn load(&self, actor: &str, id: DocumentId) -> Result<Document, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let doc = Self::fetch_document(&mut conn, id).await?;
        let collaborators = Self::fetch_collaborators(&mut conn, id).await?;
        if !can_read(&doc, &collaborators, actor) {
            return Err(StoreError::AccessDenied);
        }
        Ok(doc)
    }

    /// Compare-and-swap save. Returns the new `updated_at` on success.
    pub async fn save(
        &self,
        actor: &str,
        id: DocumentId,
        patch: DocumentPatch,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        if patch.is_empty() {
            return Err(StoreError::Invalid("empty patch".into()));
        }
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(StoreError::Invalid("title must not be empty".into()));
            }
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let mut doc = Self::fetch_document(&mut tx, id).await?;
        let collaborators = Self::fetch_collaborators(&mut tx, id).await?;
        if !can_write(&doc, &collaborators, actor) {
            return Err(StoreError::AccessDenied);
        }
        if doc.updated_at != expected_updated_at {
            return Err(StoreError::StaleWrite {
                expected: expected_updated_at,
                current: Some(doc.updated_at),
            });
        }

        if let Some(title) = patch.title {
            doc.title = title;
        }
        if let Some(content) = patch.content {
            doc.content = content;
        }
        if let Some(visibility) = patch.visibility {
            doc.visibility = visibility;
        }
        doc.updated_at = next_timestamp(doc.updated_at);

        let content = serde_json::to_string(&doc.content)
            .map_err(|e| StoreError::Invalid(format!("unserializable content: {}", e)))?;

        sqlx::query(
            "UPDATE documents SET title = ?, content = ?, visibility = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&doc.title)
        .bind(&content)
        .bind(doc.visibility.as_str())
        .bind(doc.updated_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        Ok(doc.updated_at)
    }

    /// Deletes a document. Owner only; the schema cascades collaborator and
    /// activity rows.
    pub async fn delete(&self, actor: &str, id: DocumentId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let doc = Self::fetch_document(&mut tx, id).await?;
        if doc.owner_id != actor {
            return Err(StoreError::AccessDenied);
        }

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    pub async fn list_collaborators(
        &self,
        actor: &str,
        id: DocumentId,
    ) -> Result<Vec<Collaborator>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let doc = Self::fetch_document(&mut conn, id).await?;
        let collaborators = Self::fetch_collaborators(&mut conn, id).await?;
        if !can_read(&doc, &collaborators, actor) {
            return Err(StoreError::AccessDenied);
        }
        Ok(collaborators)
    }

    /// Adds or updates a collaborator row. Owner only; upsert keeps the
    /// (document, user) pair unique.
    pub async fn add_collaborator(
        &self,
        actor: &str,
        id: DocumentId,
        user_id: &str,
        permission: Permission,
    ) -> Result<Collaborator, StoreError> {
        if user_id.trim().is_empty() {
            return Err(StoreError::Invalid("user id must not be empty".into()));
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let doc = Self::fetch_document(&mut tx, id).await?;
        if doc.owner_id != actor {
            return Err(StoreError::AccessDenied);
        }

        sqlx::query(
            r#"
            INSERT INTO collaborators (document_id, user_id, permission)
            VALUES (?, ?, ?)
            ON CONFLICT (document_id, user_id) DO UPDATE SET permission = excluded.permission
            "#,
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(permission.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        Ok(Collaborator {
            document_id: id,
            user_id: user_id.to_string(),
            permission,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (DocumentRepository, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
        (DocumentRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_load_roundtrip() {
        let (repo, _temp) = setup().await;

        let created = repo
            .create(
                "alice",
                NewDocument {
                    title: "Notes".into(),
                    content: DocContent::paragraph("hello"),
                    visibility: Visibility::Private,
                },
            )
            .await
            .unwrap();

        let loaded = repo.load("alice", created.id).await.unwrap();
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_title() {
        let (repo, _temp) = setup().await;
        let result = repo.create("alice", NewDocument::titled("   ")).await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_load_distinguishes_not_found_from_access_denied() {
        let (repo, _temp) = setup().await;
        let doc = repo
            .create("alice", NewDocument::titled("Notes"))
            .await
            .unwrap();

        assert!(matches!(
            repo.load("alice", DocumentId::new()).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            repo.load("mallory", doc.id).await,
            Err(StoreError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_save_requires_matching_baseline() {
        let (repo, _temp) = setup().await;
        let doc = repo
            .create("alice", NewDocument::titled("Notes"))
            .await
            .unwrap();

        let patch = DocumentPatch {
            content: Some(DocContent::paragraph("first save")),
            ..Default::default()
        };
        let new_ts = repo
            .save("alice", doc.id, patch, doc.updated_at)
            .await
            .unwrap();
        assert!(new_ts > doc.updated_at);

        // Second writer still holding the original baseline loses.
        let stale_patch = DocumentPatch {
            content: Some(DocContent::paragraph("late save")),
            ..Default::default()
        };
        let result = repo.save("alice", doc.id, stale_patch, doc.updated_at).await;
        match result {
            Err(StoreError::StaleWrite { current, .. }) => {
                assert_eq!(current, Some(new_ts));
            }
            other => panic!("expected StaleWrite, got {:?}", other),
        }

        // The winning content is untouched.
        let loaded = repo.load("alice", doc.id).await.unwrap();
        assert_eq!(loaded.content, DocContent::paragraph("first save"));
    }

    #[tokio::test]
    async fn test_edit_collaborator_can_save_view_cannot() {
        let (repo, _temp) = setup().await;
        let doc = repo
            .create("alice", NewDocument::titled("Notes"))
            .await
            .unwrap();
        repo.add_collaborator("alice", doc.id, "bob", Permission::Edit)
            .await
            .unwrap();
        repo.add_collaborator("alice", doc.id, "carol", Permission::View)
            .await
            .unwrap();

        let patch = DocumentPatch {
            content: Some(DocContent::paragraph("from bob")),
            ..Default::default()
        };
        let new_ts = repo
            .save("bob", doc.id, patch, doc.updated_at)
            .await
            .unwrap();

        let patch = DocumentPatch {
            content: Some(DocContent::paragraph("from carol")),
            ..Default::default()
        };
        let result = repo.save("carol", doc.id, patch, new_ts).await;
        assert!(matches!(result, Err(StoreError::AccessDenied)));
    }

    #[tokio::test]
    async fn test_public_document_readable_not_writable() {
        let (repo, _temp) = setup().await;
        let doc = repo
            .create(
                "alice",
                NewDocument {
                    title: "Handbook".into(),
                    content: DocContent::empty(),
                    visibility: Visibility::Public,
                },
            )
            .await
            .unwrap();

        assert!(repo.load("bob", doc.id).await.is_ok());

        let patch = DocumentPatch {
            content: Some(DocContent::paragraph("graffiti")),
            ..Default::default()
        };
        let result = repo.save("bob", doc.id, patch, doc.updated_at).await;
        assert!(matches!(result, Err(StoreError::AccessDenied)));
    }

    #[tokio::test]
    async fn test_delete_is_owner_only_and_cascades() {
        let (repo, _temp) = setup().await;
        let doc = repo
            .create("alice", NewDocument::titled("Notes"))
            .await
            .unwrap();
        repo.add_collaborator("alice", doc.id, "bob", Permission::Edit)
            .await
            .unwrap();

        assert!(matches!(
            repo.delete("bob", doc.id).await,
            Err(StoreError::AccessDenied)
        ));

        repo.delete("alice", doc.id).await.unwrap();
        assert!(matches!(
            repo.load("alice", doc.id).await,
            Err(StoreError::NotFound)
        ));

        // The FK cascade removed the membership rows.
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT user_id FROM collaborators WHERE document_id = ?")
                .bind(doc.id.to_string())
                .fetch_all(&repo.pool)
                .await
                .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_add_collaborator_upserts() {
        let (repo, _temp) = setup().await;
        let doc = repo
            .create("alice", NewDocument::titled("Notes"))
            .await
            .unwrap();

        repo.add_collaborator("alice", doc.id, "bob", Permission::View)
            .await
            .unwrap();
        repo.add_collaborator("alice", doc.id, "bob", Permission::Edit)
            .await
            .unwrap();

        let rows = repo.list_collaborators("alice", doc.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].permission, Permission::Edit);
    }

    #[tokio::test]
    async fn test_saves_advance_updated_at_strictly() {
        let (repo, _temp) = setup().await;
        let doc = repo
            .create("alice", NewDocument::titled("Notes"))
            .await
            .unwrap();

        let mut baseline = doc.updated_at;
        for i in 0..3 {
            let patch = DocumentPatch {
                content: Some(DocContent::paragraph(format!("rev {}", i))),
                ..Default::default()
            };
            let new_ts = repo.save("alice", doc.id, patch, baseline).await.unwrap();
            assert!(new_ts > baseline);
            baseline = new_ts;
        }
    }
}
