//! In-process store backend.
//!
//! Implements the same contract as the sqlite-backed server store, including
//! compare-and-swap saves and the access rules. Used by unit and integration
//! tests, and handy for driving the session engine without a server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::{
    ActivityAction, ActivityEntry, Collaborator, Document, DocumentId, Permission, Visibility,
};

use super::{ActivityRecorder, DocumentPatch, DocumentStore, NewDocument};

#[derive(Default)]
struct State {
    documents: HashMap<DocumentId, Document>,
    collaborators: HashMap<DocumentId, Vec<Collaborator>>,
    activity: Vec<ActivityEntry>,
    next_activity_id: i64,
    successful_saves: u64,
}

/// Shared in-memory backend. Clone handles freely; all clones see the same
/// state. Obtain a per-user [`DocumentStore`] via [`MemoryBackend::client`].
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a store handle bound to `user_id`.
    pub fn client(&self, user_id: impl Into<String>) -> MemoryClient {
        MemoryClient {
            state: self.state.clone(),
            user_id: user_id.into(),
        }
    }

    /// Number of saves that passed the compare-and-swap check.
    pub async fn save_count(&self) -> u64 {
        self.state.lock().await.successful_saves
    }
}

/// A [`MemoryBackend`] handle acting as one authenticated user.
#[derive(Clone)]
pub struct MemoryClient {
    state: Arc<Mutex<State>>,
    user_id: String,
}

impl MemoryClient {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
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

/// Timestamps must advance strictly per document or compare-and-swap could
/// miss a write landing within clock resolution.
fn next_timestamp(after: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > after {
        now
    } else {
        after + Duration::milliseconds(1)
    }
}

#[async_trait]
impl DocumentStore for MemoryClient {
    async fn create(&self, new: NewDocument) -> Result<Document, StoreError> {
        if new.title.trim().is_empty() {
            return Err(StoreError::Invalid("title must not be empty".into()));
        }

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let doc = Document {
            id: DocumentId::new(),
            title: new.title,
            content: new.content,
            owner_id: self.user_id.clone(),
            visibility: new.visibility,
            created_at: now,
            updated_at: now,
        };
        state.documents.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn load(&self, id: DocumentId) -> Result<Document, StoreError> {
        let state = self.state.lock().await;
        let doc = state.documents.get(&id).ok_or(StoreError::NotFound)?;
        let collaborators: &[Collaborator] =
            state.collaborators.get(&id).map_or(&[], |c| c.as_slice());
        if !can_read(doc, collaborators, &self.user_id) {
            return Err(StoreError::AccessDenied);
        }
        Ok(doc.clone())
    }

    async fn save(
        &self,
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

        let mut state = self.state.lock().await;
        let collaborators = state.collaborators.get(&id).cloned().unwrap_or_default();
        let doc = state.documents.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !can_write(doc, &collaborators, &self.user_id) {
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
        let new_updated_at = doc.updated_at;
        state.successful_saves += 1;
        Ok(new_updated_at)
    }

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let doc = state.documents.get(&id).ok_or(StoreError::NotFound)?;
        if doc.owner_id != self.user_id {
            return Err(StoreError::AccessDenied);
        }
        state.documents.remove(&id);
        // Cascade, as the schema does on the server.
        state.collaborators.remove(&id);
        state.activity.retain(|a| a.document_id != id);
        Ok(())
    }

    async fn list_collaborators(&self, id: DocumentId) -> Result<Vec<Collaborator>, StoreError> {
        self.load(id).await?;
        let state = self.state.lock().await;
        Ok(state.collaborators.get(&id).cloned().unwrap_or_default())
    }

    async fn add_collaborator(
        &self,
        id: DocumentId,
        user_id: &str,
        permission: Permission,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let doc = state.documents.get(&id).ok_or(StoreError::NotFound)?;
        if doc.owner_id != self.user_id {
            return Err(StoreError::AccessDenied);
        }
        let rows = state.collaborators.entry(id).or_default();
        match rows.iter_mut().find(|c| c.user_id == user_id) {
            Some(row) => row.permission = permission,
            None => rows.push(Collaborator {
                document_id: id,
                user_id: user_id.to_string(),
                permission,
            }),
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityRecorder for MemoryClient {
    async fn record(
        &self,
        document_id: DocumentId,
        action: ActivityAction,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.documents.contains_key(&document_id) {
            return Err(StoreError::NotFound);
        }
        state.next_activity_id += 1;
        let entry = ActivityEntry {
            id: state.next_activity_id,
            document_id,
            actor_id: self.user_id.clone(),
            action,
            details,
            at: Utc::now(),
        };
        state.activity.push(entry);
        Ok(())
    }

    async fn list(
        &self,
        document_id: DocumentId,
        limit: u32,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries: Vec<ActivityEntry> = state
            .activity
            .iter()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.at.cmp(&b.at).then(a.id.cmp(&b.id)));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}
