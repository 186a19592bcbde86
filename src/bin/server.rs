//! Quillsync Sync Server
//!
//! Stores documents, applies compare-and-swap saves, keeps the activity
//! trail, and pushes row-level change notifications to subscribed editors
//! over the websocket feed.
//!
//! # Configuration
//!
//! Environment variables:
//! - `QUILLSYNC_PORT`: Port to listen on (default: 8080)
//! - `QUILLSYNC_DATABASE_PATH`: Sqlite database file
//!   (default: ~/.local/share/quillsync-server/quillsync.db)
//! - `QUILLSYNC_CONFIG`: Path to config file
//!   (default: ~/.config/quillsync-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "user1"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check (no auth required)
//! - `GET /me`: Current user info (auth required)
//! - `POST /documents`, `GET/PUT/DELETE /documents/{id}` (auth required;
//!   `PUT` is a compare-and-swap keyed on `expected_updated_at`)
//! - `GET/POST /documents/{id}/activity`, `GET/POST
//!   /documents/{id}/collaborators` (auth required)
//! - `GET /feed`: Websocket change feed (auth via `?key=` parameter)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quillsync::server::{router, ActivityLog, ApiKeyStore, AppState, DocumentRepository, FeedHub};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Sqlite database file
    database_path: PathBuf,
    /// Path to the api-key config file
    config_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("QUILLSYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let database_path = std::env::var("QUILLSYNC_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("quillsync-server")
                    .join("quillsync.db")
            });

        let config_path = std::env::var("QUILLSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("quillsync-server")
                    .join("config.yaml")
            });

        Self {
            port,
            database_path,
            config_path,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quillsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    tracing::info!("Database: {}", config.database_path.display());
    tracing::info!("Config file: {}", config.config_path.display());

    // Open the database and run migrations
    let pool = match quillsync::server::init_db(config.database_path.clone()).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Load API keys
    let api_keys = Arc::new(ApiKeyStore::load(&config.config_path));

    // Build app state
    let state = AppState {
        documents: DocumentRepository::new(pool.clone()),
        activity: ActivityLog::new(pool),
        hub: Arc::new(FeedHub::new()),
        api_keys,
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
