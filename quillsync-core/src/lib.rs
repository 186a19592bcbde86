//! Quillsync Core Library
//!
//! Shared types and the document synchronization engine for Quillsync
//! clients: data model, store access, the server-pushed change feed, and
//! per-document edit sessions.

pub mod error;
pub mod feed;
pub mod models;
pub mod session;
pub mod store;

pub use error::{FeedError, StoreError};
pub use feed::{ChangeEvent, ChangeFeedClient, ChangePayload, FeedMessage, FeedSubscription};
pub use models::{
    ActivityAction, ActivityEntry, Collaborator, ContentNode, DocContent, Document, DocumentId,
    Permission, Visibility,
};
pub use session::{
    open_session, CloseReason, ConflictResolution, EditSession, SessionHandle, SessionOptions,
    SessionPhase, SessionSnapshot, TitleEditController, TitleEditState,
};
pub use store::{
    record_best_effort, ActivityRecorder, DocumentPatch, DocumentStore, MemoryBackend,
    MemoryClient, NewDocument, RemoteStore,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
