//! Persistence for OAuth tokens.
//!
//! Both OAuth backends keep their token in the session cache; when a cache
//! file is configured the token is also written to disk so a restart can skip
//! the token exchange (and, for the authorization-code flow, the interactive
//! bootstrap).

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::CredentialError;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredToken")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoredToken>, CredentialError>;

    async fn save(&self, token: &StoredToken) -> Result<(), CredentialError>;
}

/// JSON file store, rewritten in full after every exchange or refresh.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn load(&self) -> Result<Option<StoredToken>, CredentialError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let token = serde_json::from_slice(&bytes)?;
        debug!(path = %self.path.display(), "Loaded cached OAuth token");
        Ok(Some(token))
    }

    async fn save(&self, token: &StoredToken) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(token)?;
        crate::utils::fs::write_atomic(&self.path, &json)
            .await
            .map_err(|e| CredentialError::Configuration(e.to_string()))?;
        debug!(path = %self.path.display(), "Persisted OAuth token");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("oauth.json"));

        assert!(store.load().await.unwrap().is_none());

        let token = StoredToken {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Utc::now(),
        };
        store.save(&token).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = JsonFileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, CredentialError::Json(_)));
    }
}
