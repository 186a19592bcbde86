//! Server-side modules for the Quillsync sync server.

pub mod activity;
pub mod auth;
pub mod feed;
pub mod http;
pub mod storage;

pub use activity::ActivityLog;
pub use auth::{ApiKeyStore, AuthUser};
pub use feed::FeedHub;
pub use http::{router, AppState};
pub use storage::{init_db, DocumentRepository};
