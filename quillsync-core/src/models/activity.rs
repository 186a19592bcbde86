//! Append-only activity trail entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::DocumentId;

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Edited,
    Renamed,
    Shared,
    Deleted,
    CollaboratorAdded,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::Edited => "edited",
            ActivityAction::Renamed => "renamed",
            ActivityAction::Shared => "shared",
            ActivityAction::Deleted => "deleted",
            ActivityAction::CollaboratorAdded => "collaborator_added",
        }
    }

    /// Parse from string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ActivityAction::Created),
            "edited" => Some(ActivityAction::Edited),
            "renamed" => Some(ActivityAction::Renamed),
            "shared" => Some(ActivityAction::Shared),
            "deleted" => Some(ActivityAction::Deleted),
            "collaborator_added" => Some(ActivityAction::CollaboratorAdded),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded action. Never mutated once written; ordering for a document
/// is by timestamp, ties broken by insertion order at the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub document_id: DocumentId,
    pub actor_id: String,
    pub action: ActivityAction,
    /// Small action-specific payload, e.g. `{"old_title", "new_title"}` for
    /// a rename.
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Details payload for a `renamed` entry.
pub fn renamed_details(old_title: &str, new_title: &str) -> serde_json::Value {
    serde_json::json!({ "old_title": old_title, "new_title": new_title })
}
