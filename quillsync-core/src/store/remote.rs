//! HTTP implementation of the store traits against the sync server.
//!
//! One instance per authenticated user; the API key establishes identity and
//! the server applies the access rules. HTTP statuses map onto the store
//! error taxonomy: 404 `NotFound`, 403 `AccessDenied`, 409 `StaleWrite`,
//! 400 `Invalid`, anything transport-level or 5xx `TransientIo`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{
    ActivityAction, ActivityEntry, Collaborator, Document, DocumentId, Permission,
};

use super::{ActivityRecorder, DocumentPatch, DocumentStore, NewDocument};

/// Body of `PUT /documents/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    #[serde(flatten)]
    pub patch: DocumentPatch,
    pub expected_updated_at: DateTime<Utc>,
}

/// Body of a successful save response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /documents/{id}/activity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordActivityRequest {
    pub action: ActivityAction,
    pub details: serde_json::Value,
}

/// Body of `POST /documents/{id}/collaborators`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCollaboratorRequest {
    pub user_id: String,
    pub permission: Permission,
}

/// Error body returned by the server. On a 409 it carries the server's
/// current `updated_at` so the client can reason about the conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_updated_at: Option<DateTime<Utc>>,
}

/// Store client talking to the Quillsync server REST API.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    server_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl RemoteStore {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Builds an HTTP URL for a given path, normalizing ws(s) schemes.
    pub fn build_http_url(&self, path: &str) -> String {
        let base_url = if self.server_url.starts_with("ws://") {
            self.server_url.replace("ws://", "http://")
        } else if self.server_url.starts_with("wss://") {
            self.server_url.replace("wss://", "https://")
        } else if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn document_url(&self, id: DocumentId) -> String {
        self.build_http_url(&format!("/documents/{}", id))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Converts a non-success response into the matching store error.
    async fn status_error(response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body: Option<ErrorBody> = response.json().await.ok();
        match status.as_u16() {
            404 => StoreError::NotFound,
            401 | 403 => StoreError::AccessDenied,
            400 => StoreError::Invalid(
                body.and_then(|b| b.message)
                    .unwrap_or_else(|| "bad request".into()),
            ),
            409 => StoreError::Invalid("conflict response without save context".into()),
            _ => StoreError::TransientIo(format!("server returned status {}", status)),
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::status_error(response).await)
        }
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::TransientIo(e.to_string())
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn create(&self, new: NewDocument) -> Result<Document, StoreError> {
        let url = self.build_http_url("/documents");
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&new)
            .send()
            .await
            .map_err(transport)?;
        Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }

    async fn load(&self, id: DocumentId) -> Result<Document, StoreError> {
        let response = self
            .request(reqwest::Method::GET, &self.document_url(id))
            .send()
            .await
            .map_err(transport)?;
        Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }

    async fn save(
        &self,
        id: DocumentId,
        patch: DocumentPatch,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let body = SaveRequest {
            patch,
            expected_updated_at,
        };
        let response = self
            .request(reqwest::Method::PUT, &self.document_url(id))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        if response.status().as_u16() == 409 {
            let conflict: Option<ErrorBody> = response.json().await.ok();
            return Err(StoreError::StaleWrite {
                expected: expected_updated_at,
                current: conflict.and_then(|b| b.server_updated_at),
            });
        }

        let saved: SaveResponse = Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(transport)?;
        Ok(saved.updated_at)
    }

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::DELETE, &self.document_url(id))
            .send()
            .await
            .map_err(transport)?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn list_collaborators(&self, id: DocumentId) -> Result<Vec<Collaborator>, StoreError> {
        let url = format!("{}/collaborators", self.document_url(id));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(transport)?;
        Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }

    async fn add_collaborator(
        &self,
        id: DocumentId,
        user_id: &str,
        permission: Permission,
    ) -> Result<(), StoreError> {
        let url = format!("{}/collaborators", self.document_url(id));
        let body = AddCollaboratorRequest {
            user_id: user_id.to_string(),
            permission,
        };
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        Self::expect_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ActivityRecorder for RemoteStore {
    async fn record(
        &self,
        document_id: DocumentId,
        action: ActivityAction,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        let url = format!("{}/activity", self.document_url(document_id));
        let body = RecordActivityRequest { action, details };
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn list(
        &self,
        document_id: DocumentId,
        limit: u32,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let url = format!("{}/activity?limit={}", self.document_url(document_id), limit);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(transport)?;
        Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_url() {
        let store = RemoteStore::new("http://localhost:8080", "test-key");
        assert_eq!(
            store.build_http_url("/documents"),
            "http://localhost:8080/documents"
        );

        let store = RemoteStore::new("ws://localhost:8080", "test-key");
        assert_eq!(
            store.build_http_url("/documents"),
            "http://localhost:8080/documents"
        );

        let store = RemoteStore::new("wss://sync.example.com", "test-key");
        assert_eq!(
            store.build_http_url("/documents"),
            "https://sync.example.com/documents"
        );

        let store = RemoteStore::new("localhost:8080", "test-key");
        assert_eq!(
            store.build_http_url("/documents"),
            "http://localhost:8080/documents"
        );

        let store = RemoteStore::new("https://sync.example.com/", "test-key");
        assert_eq!(
            store.build_http_url("/documents"),
            "https://sync.example.com/documents"
        );
    }

    #[test]
    fn test_save_request_body_flattens_patch() {
        let request = SaveRequest {
            patch: DocumentPatch {
                title: Some("Report".into()),
                ..Default::default()
            },
            expected_updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["title"], "Report");
        assert!(json.get("content").is_none());
        assert!(json.get("expected_updated_at").is_some());
    }
}
