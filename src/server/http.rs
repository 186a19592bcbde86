//! HTTP API surface.
//!
//! REST endpoints for document persistence plus the websocket feed upgrade.
//! Store errors map onto statuses the client unmaps into the same taxonomy:
//! 404 `NotFound`, 403 `AccessDenied`, 409 `StaleWrite` (carrying the
//! server's current `updated_at`), 400 `Invalid`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use quillsync_core::store::{
    AddCollaboratorRequest, ErrorBody, NewDocument, RecordActivityRequest, SaveRequest,
    SaveResponse,
};
use quillsync_core::{ActivityAction, ActivityEntry, Collaborator, Document, DocumentId, StoreError};

use super::activity::ActivityLog;
use super::auth::{auth_middleware, ApiKeyStore, AuthUser};
use super::feed::{serve_feed_socket, FeedHub};
use super::storage::DocumentRepository;

/// Default and maximum page size for activity listings.
const DEFAULT_ACTIVITY_LIMIT: u32 = 50;
const MAX_ACTIVITY_LIMIT: u32 = 500;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub documents: DocumentRepository,
    pub activity: ActivityLog,
    pub hub: Arc<FeedHub>,
    pub api_keys: Arc<ApiKeyStore>,
}

/// Maps store errors onto HTTP responses.
struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            StoreError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "not_found".into(),
                    message: None,
                    server_updated_at: None,
                },
            ),
            StoreError::AccessDenied => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    error: "access_denied".into(),
                    message: None,
                    server_updated_at: None,
                },
            ),
            StoreError::StaleWrite { current, .. } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    error: "stale_write".into(),
                    message: Some("the document changed since it was loaded".into()),
                    server_updated_at: current,
                },
            ),
            StoreError::Invalid(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "invalid".into(),
                    message: Some(message),
                    server_updated_at: None,
                },
            ),
            StoreError::TransientIo(message) => {
                tracing::error!("internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal".into(),
                        message: None,
                        server_updated_at: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn parse_id(id: &str) -> Result<DocumentId, ApiError> {
    id.parse().map_err(|_| ApiError(StoreError::NotFound))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current user response
#[derive(Serialize)]
struct MeResponse {
    user_id: String,
}

/// Get current user info (auth required)
async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
    })
}

async fn create_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewDocument>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state.documents.create(&user.user_id, body).await?;

    if let Err(e) = state
        .activity
        .append(
            doc.id,
            &user.user_id,
            ActivityAction::Created,
            &serde_json::json!({"title": doc.title}),
        )
        .await
    {
        tracing::warn!("failed to record created activity for {}: {}", doc.id, e);
    }
    state.hub.publish_document_updated(&doc).await;

    Ok((StatusCode::CREATED, Json(doc)))
}

async fn get_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.documents.load(&user.user_id, id).await?))
}

async fn update_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, ApiError> {
    let id = parse_id(&id)?;
    let updated_at = state
        .documents
        .save(&user.user_id, id, body.patch, body.expected_updated_at)
        .await?;

    // Re-read so the feed carries the full new row.
    match state.documents.load(&user.user_id, id).await {
        Ok(doc) => state.hub.publish_document_updated(&doc).await,
        Err(e) => tracing::warn!("failed to reload {} for the feed: {}", id, e),
    }

    Ok(Json(SaveResponse { updated_at }))
}

async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.documents.delete(&user.user_id, id).await?;
    state.hub.publish_document_deleted(id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ActivityQuery {
    limit: Option<u32>,
}

async fn list_activity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let id = parse_id(&id)?;
    // Read access gates the trail.
    state.documents.load(&user.user_id, id).await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .min(MAX_ACTIVITY_LIMIT);
    Ok(Json(state.activity.list(id, limit).await?))
}

async fn record_activity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<RecordActivityRequest>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.documents.load(&user.user_id, id).await?;
    state
        .activity
        .append(id, &user.user_id, body.action, &body.details)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_collaborators(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Collaborator>>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(
        state.documents.list_collaborators(&user.user_id, id).await?,
    ))
}

async fn add_collaborator(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<AddCollaboratorRequest>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let row = state
        .documents
        .add_collaborator(&user.user_id, id, &body.user_id, body.permission)
        .await?;

    if let Err(e) = state
        .activity
        .append(
            id,
            &user.user_id,
            ActivityAction::CollaboratorAdded,
            &serde_json::json!({
                "user_id": row.user_id,
                "permission": row.permission.as_str(),
            }),
        )
        .await
    {
        tracing::warn!("failed to record collaborator activity for {}: {}", id, e);
    }
    state.hub.publish_collaborator(&row).await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct FeedParams {
    key: String,
}

/// Websocket feed endpoint. Auth via query parameter.
async fn feed_ws(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.api_keys.validate(&params.key) {
        Some(_user) => {
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| serve_feed_socket(socket, hub))
        }
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Assembles the full router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/feed", get(feed_ws));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(me))
        .route("/documents", post(create_document))
        .route(
            "/documents/{id}",
            get(get_document)
                .put(update_document)
                .delete(delete_document),
        )
        .route(
            "/documents/{id}/activity",
            get(list_activity).post(record_activity),
        )
        .route(
            "/documents/{id}/collaborators",
            get(list_collaborators).post(add_collaborator),
        )
        .layer(middleware::from_fn_with_state(
            state.api_keys.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
