//! Wire protocol for the change feed.
//!
//! CBOR-encoded envelopes over the websocket, with row payloads carried as
//! raw JSON bytes so the envelope stays decoupled from the row schema.
//! Field names use camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::models::{Collaborator, Document, DocumentId};

/// Table names used on the wire.
pub const TABLE_DOCUMENTS: &str = "documents";
pub const TABLE_COLLABORATORS: &str = "collaborators";

/// Event type names used on the wire.
pub const EVENT_UPDATED: &str = "updated";
pub const EVENT_DELETED: &str = "deleted";

/// Messages exchanged on the feed connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedMessage {
    /// Client asks for mutation events of one document.
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "documentId")]
        document_id: String,
    },
    /// Client releases a subscription. Safe to send repeatedly.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "documentId")]
        document_id: String,
    },
    /// Server-pushed row mutation.
    #[serde(rename = "event")]
    Event {
        #[serde(rename = "documentId")]
        document_id: String,
        /// Source table: "documents" or "collaborators".
        entity: String,
        #[serde(rename = "eventType")]
        event_type: String,
        /// The new row, JSON-encoded. Empty for deletions.
        #[serde(with = "serde_bytes")]
        row: Vec<u8>,
    },
    /// Server-side error report.
    #[serde(rename = "error")]
    Error { message: String },
}

impl FeedMessage {
    /// Encode message as CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FeedError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| FeedError::Cbor(e.to_string()))?;
        Ok(buf)
    }

    /// Decode message from CBOR bytes.
    pub fn decode(data: &[u8]) -> Result<Self, FeedError> {
        ciborium::from_reader(data).map_err(|e| FeedError::Cbor(e.to_string()))
    }
}

/// A decoded mutation notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub document_id: DocumentId,
    pub payload: ChangePayload,
}

/// What changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangePayload {
    /// The document row was created or updated; carries the full new row.
    DocumentUpdated(Document),
    /// The document was deleted.
    DocumentDeleted,
    /// A collaborator row was added or its permission changed.
    CollaboratorUpserted(Collaborator),
}

impl ChangeEvent {
    /// Builds the wire message for a document update.
    pub fn document_updated(doc: &Document) -> Result<FeedMessage, FeedError> {
        Ok(FeedMessage::Event {
            document_id: doc.id.to_string(),
            entity: TABLE_DOCUMENTS.to_string(),
            event_type: EVENT_UPDATED.to_string(),
            row: serde_json::to_vec(doc).map_err(|e| FeedError::Protocol(e.to_string()))?,
        })
    }

    /// Builds the wire message for a document deletion.
    pub fn document_deleted(id: DocumentId) -> FeedMessage {
        FeedMessage::Event {
            document_id: id.to_string(),
            entity: TABLE_DOCUMENTS.to_string(),
            event_type: EVENT_DELETED.to_string(),
            row: Vec::new(),
        }
    }

    /// Builds the wire message for a collaborator upsert.
    pub fn collaborator_upserted(row: &Collaborator) -> Result<FeedMessage, FeedError> {
        Ok(FeedMessage::Event {
            document_id: row.document_id.to_string(),
            entity: TABLE_COLLABORATORS.to_string(),
            event_type: EVENT_UPDATED.to_string(),
            row: serde_json::to_vec(row).map_err(|e| FeedError::Protocol(e.to_string()))?,
        })
    }

    /// Decodes an `Event` envelope into a typed notification.
    pub fn from_message(message: &FeedMessage) -> Result<ChangeEvent, FeedError> {
        let FeedMessage::Event {
            document_id,
            entity,
            event_type,
            row,
        } = message
        else {
            return Err(FeedError::Protocol("not an event message".into()));
        };

        let document_id: DocumentId = document_id
            .parse()
            .map_err(|_| FeedError::Protocol(format!("bad document id: {}", document_id)))?;

        let payload = match (entity.as_str(), event_type.as_str()) {
            (TABLE_DOCUMENTS, EVENT_UPDATED) => {
                let doc: Document = serde_json::from_slice(row)
                    .map_err(|e| FeedError::Protocol(format!("bad document row: {}", e)))?;
                ChangePayload::DocumentUpdated(doc)
            }
            (TABLE_DOCUMENTS, EVENT_DELETED) => ChangePayload::DocumentDeleted,
            (TABLE_COLLABORATORS, _) => {
                let row: Collaborator = serde_json::from_slice(row)
                    .map_err(|e| FeedError::Protocol(format!("bad collaborator row: {}", e)))?;
                ChangePayload::CollaboratorUpserted(row)
            }
            (entity, event_type) => {
                return Err(FeedError::Protocol(format!(
                    "unknown event {}/{}",
                    entity, event_type
                )));
            }
        };

        Ok(ChangeEvent {
            document_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocContent, Permission, Visibility};
    use chrono::Utc;

    fn sample_document() -> Document {
        let now = Utc::now();
        Document {
            id: DocumentId::new(),
            title: "Notes".into(),
            content: DocContent::paragraph("hello"),
            owner_id: "alice".into(),
            visibility: Visibility::Private,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_subscribe_encode_decode() {
        let msg = FeedMessage::Subscribe {
            document_id: "doc123".into(),
        };
        let encoded = msg.encode().unwrap();
        let decoded = FeedMessage::decode(&encoded).unwrap();
        match decoded {
            FeedMessage::Subscribe { document_id } => assert_eq!(document_id, "doc123"),
            other => panic!("expected Subscribe, got {:?}", other),
        }
    }

    #[test]
    fn test_document_update_roundtrip() {
        let doc = sample_document();
        let msg = ChangeEvent::document_updated(&doc).unwrap();
        let decoded = FeedMessage::decode(&msg.encode().unwrap()).unwrap();
        let event = ChangeEvent::from_message(&decoded).unwrap();

        assert_eq!(event.document_id, doc.id);
        match event.payload {
            ChangePayload::DocumentUpdated(row) => {
                assert_eq!(row.title, "Notes");
                assert_eq!(row.content, doc.content);
            }
            other => panic!("expected DocumentUpdated, got {:?}", other),
        }
    }

    #[test]
    fn test_document_deleted_has_empty_row() {
        let id = DocumentId::new();
        let msg = ChangeEvent::document_deleted(id);
        let event = ChangeEvent::from_message(&msg).unwrap();
        assert_eq!(event.document_id, id);
        assert_eq!(event.payload, ChangePayload::DocumentDeleted);
    }

    #[test]
    fn test_collaborator_roundtrip() {
        let row = Collaborator {
            document_id: DocumentId::new(),
            user_id: "bob".into(),
            permission: Permission::Edit,
        };
        let msg = ChangeEvent::collaborator_upserted(&row).unwrap();
        let event = ChangeEvent::from_message(&msg).unwrap();
        assert_eq!(
            event.payload,
            ChangePayload::CollaboratorUpserted(row.clone())
        );
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let msg = FeedMessage::Event {
            document_id: DocumentId::new().to_string(),
            entity: "documents".into(),
            event_type: "truncated".into(),
            row: Vec::new(),
        };
        assert!(ChangeEvent::from_message(&msg).is_err());
    }

    #[test]
    fn test_non_event_is_rejected() {
        let msg = FeedMessage::Error {
            message: "boom".into(),
        };
        assert!(ChangeEvent::from_message(&msg).is_err());
    }
}
