//! API-key authentication.
//!
//! Keys are loaded from a yaml config file mapping each key to a user id.
//! Authenticated handlers receive the user through a request extension; the
//! websocket feed authenticates via a `key` query parameter since browsers
//! cannot set headers on websocket upgrades.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    user_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct KeysFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Authenticated user info, added to request extensions after auth.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// API key store - maps key -> AuthUser.
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    /// Load API keys from the config file.
    pub fn load(config_path: &Path) -> Self {
        let keys = match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<KeysFile>(&contents) {
                Ok(config) => {
                    let mut map = HashMap::new();
                    for entry in config.api_keys {
                        map.insert(
                            entry.key,
                            AuthUser {
                                user_id: entry.user_id,
                            },
                        );
                    }
                    tracing::info!("Loaded {} API key(s)", map.len());
                    map
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                HashMap::new()
            }
        };

        Self { keys }
    }

    /// Builds a store from explicit (key, user id) pairs.
    pub fn from_keys<I, K, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, U)>,
        K: Into<String>,
        U: Into<String>,
    {
        let keys = entries
            .into_iter()
            .map(|(key, user_id)| {
                (
                    key.into(),
                    AuthUser {
                        user_id: user_id.into(),
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Validate an API key and return the associated user.
    pub fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }
}

/// Auth error response
#[derive(Serialize)]
struct AuthError {
    error: &'static str,
    message: &'static str,
}

/// Authentication middleware for the REST routes.
pub async fn auth_middleware(
    State(keys): State<Arc<ApiKeyStore>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "invalid_auth",
                    message: "Authorization header must use Bearer scheme",
                }),
            )
                .into_response();
        }
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "missing_auth",
                    message: "Authorization header required",
                }),
            )
                .into_response();
        }
    };

    match keys.validate(api_key) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(AuthError {
                error: "invalid_key",
                message: "Invalid API key",
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_yaml_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "api_keys:").unwrap();
        writeln!(file, "  - key: secret-1").unwrap();
        writeln!(file, "    user_id: alice").unwrap();
        writeln!(file, "  - key: secret-2").unwrap();
        writeln!(file, "    user_id: bob").unwrap();

        let store = ApiKeyStore::load(&config_path);
        assert_eq!(store.validate("secret-1").unwrap().user_id, "alice");
        assert_eq!(store.validate("secret-2").unwrap().user_id, "bob");
        assert!(store.validate("secret-3").is_none());
    }

    #[test]
    fn test_missing_file_yields_empty_store() {
        let temp_dir = tempdir().unwrap();
        let store = ApiKeyStore::load(&temp_dir.path().join("nonexistent.yaml"));
        assert!(store.validate("anything").is_none());
    }

    #[test]
    fn test_from_keys() {
        let store = ApiKeyStore::from_keys([("k1", "alice")]);
        assert_eq!(store.validate("k1").unwrap().user_id, "alice");
    }
}
