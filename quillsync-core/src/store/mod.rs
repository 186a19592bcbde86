//! Storage seams: authoritative document persistence and the activity trail.
//!
//! A `DocumentStore` is bound to one authenticated user; access rules are
//! applied by the backing implementation. Saves are compare-and-swap writes
//! keyed on `updated_at` — a mismatch is a [`StoreError::StaleWrite`], never
//! a silent overwrite.

mod memory;
mod remote;

pub use memory::{MemoryBackend, MemoryClient};
pub use remote::{
    AddCollaboratorRequest, ErrorBody, RecordActivityRequest, RemoteStore, SaveRequest,
    SaveResponse,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{
    ActivityAction, ActivityEntry, Collaborator, DocContent, Document, DocumentId, Permission,
    Visibility,
};

/// Fields for creating a new document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub content: DocContent,
    pub visibility: Visibility,
}

impl NewDocument {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: DocContent::empty(),
            visibility: Visibility::Private,
        }
    }
}

/// Partial update applied by a save. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<DocContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.visibility.is_none()
    }
}

/// Authoritative read/write access to documents, bound to one user.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document owned by the bound user.
    async fn create(&self, new: NewDocument) -> Result<Document, StoreError>;

    /// Loads a document. `NotFound` if the id does not resolve,
    /// `AccessDenied` when it exists but the user may not read it.
    async fn load(&self, id: DocumentId) -> Result<Document, StoreError>;

    /// Compare-and-swap update. Succeeds only while the persisted
    /// `updated_at` still equals `expected_updated_at`; returns the new
    /// timestamp so the caller can advance its baseline.
    async fn save(
        &self,
        id: DocumentId,
        patch: DocumentPatch,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError>;

    /// Deletes a document. Owner only.
    async fn delete(&self, id: DocumentId) -> Result<(), StoreError>;

    async fn list_collaborators(&self, id: DocumentId) -> Result<Vec<Collaborator>, StoreError>;

    /// Adds or updates a collaborator (set semantics: at most one row per
    /// (document, user) pair).
    async fn add_collaborator(
        &self,
        id: DocumentId,
        user_id: &str,
        permission: Permission,
    ) -> Result<(), StoreError>;
}

/// Append/read access to the activity trail, bound to one user.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    /// Appends one entry attributed to the bound user.
    async fn record(
        &self,
        document_id: DocumentId,
        action: ActivityAction,
        details: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Lists entries for a document, oldest first, up to `limit`.
    async fn list(
        &self,
        document_id: DocumentId,
        limit: u32,
    ) -> Result<Vec<ActivityEntry>, StoreError>;
}

/// Best-effort append: the activity trail must never fail or roll back the
/// operation it annotates, so failures are logged and swallowed.
pub async fn record_best_effort(
    recorder: &dyn ActivityRecorder,
    document_id: DocumentId,
    action: ActivityAction,
    details: serde_json::Value,
) {
    if let Err(e) = recorder.record(document_id, action, details).await {
        tracing::warn!("failed to record {} activity for {}: {}", action, document_id, e);
    }
}
