//! OAuth client-credentials backend (app-level token, no user context).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::oauth::{self, ClientAuth};
use crate::config::ClientCredentialsConfig;
use crate::credentials::error::CredentialError;
use crate::credentials::manager::TokenBackend;
use crate::credentials::store::{CredentialStore, JsonFileStore};
use crate::credentials::types::{AccessToken, BackendKind, TokenCache};

pub struct ClientCredentialsBackend {
    client: Client,
    config: ClientCredentialsConfig,
    store: Option<Arc<dyn CredentialStore>>,
    timeout: Duration,
}

impl ClientCredentialsBackend {
    pub fn new(client: Client, config: ClientCredentialsConfig, timeout: Duration) -> Self {
        let store = config
            .cache_path
            .clone()
            .map(|p| Arc::new(JsonFileStore::new(p)) as Arc<dyn CredentialStore>);
        Self {
            client,
            config,
            store,
            timeout,
        }
    }
}

#[async_trait]
impl TokenBackend for ClientCredentialsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OAuthClientCredentials
    }

    fn check_config(&self) -> Result<(), CredentialError> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(CredentialError::Configuration(
                "client id and secret are required".to_string(),
            ));
        }
        Ok(())
    }

    async fn restore(&self, cache: &mut TokenCache) {
        oauth::hydrate(self.store.as_ref(), cache, self.kind(), &self.config.client_id).await;
    }

    #[instrument(skip(self, _cache))]
    async fn fetch(&self, _cache: &mut TokenCache) -> Result<AccessToken, CredentialError> {
        debug!("Requesting client-credentials token");
        let response = oauth::request_token(
            &self.client,
            &self.config.token_url,
            self.kind(),
            ClientAuth::Basic {
                id: &self.config.client_id,
                secret: &self.config.client_secret,
            },
            &[("grant_type", "client_credentials")],
            self.timeout,
        )
        .await?;

        let (token, _) = response.into_access_token(self.kind(), &self.config.client_id)?;
        oauth::persist(self.store.as_ref(), &token, None).await;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TokenBroker;
    use crate::utils::http_client::build_client;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, cache_path: Option<std::path::PathBuf>) -> ClientCredentialsConfig {
        ClientCredentialsConfig {
            client_id: "app".into(),
            client_secret: "secret".into(),
            token_url: format!("{}/api/token", server.uri()),
            cache_path,
        }
    }

    #[tokio::test]
    async fn test_fetch_and_reuse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "app-token",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cc.json");
        let backend = ClientCredentialsBackend::new(
            build_client(Duration::from_secs(5)),
            config(&server, Some(cache_path.clone())),
            Duration::from_secs(5),
        );
        let broker = TokenBroker::new(Arc::new(backend));
        let mut cache = TokenCache::new();

        assert_eq!(broker.get_token(&mut cache).await.unwrap().bearer, "app-token");
        assert_eq!(broker.get_token(&mut cache).await.unwrap().bearer, "app-token");
        assert!(cache_path.exists());
    }

    #[tokio::test]
    async fn test_persisted_token_skips_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cc.json");
        JsonFileStore::new(&cache_path)
            .save(&crate::credentials::store::StoredToken {
                access_token: "from-disk".into(),
                refresh_token: None,
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
            .await
            .unwrap();

        let backend = ClientCredentialsBackend::new(
            build_client(Duration::from_secs(5)),
            config(&server, Some(cache_path)),
            Duration::from_secs(5),
        );
        let auth = TokenBroker::new(Arc::new(backend))
            .get_token(&mut TokenCache::new())
            .await
            .unwrap();
        assert_eq!(auth.bearer, "from-disk");
    }

    #[tokio::test]
    async fn test_invalid_client_requires_manual_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "Invalid client secret",
            })))
            .mount(&server)
            .await;

        let backend = ClientCredentialsBackend::new(
            build_client(Duration::from_secs(5)),
            config(&server, None),
            Duration::from_secs(5),
        );
        let err = backend.fetch(&mut TokenCache::new()).await.unwrap_err();
        assert!(err.requires_relogin());
    }

    #[tokio::test]
    async fn test_oversized_expires_in_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "app-token",
                "token_type": "Bearer",
                "expires_in": 1_i64 << 62,
            })))
            .mount(&server)
            .await;

        let backend = ClientCredentialsBackend::new(
            build_client(Duration::from_secs(5)),
            config(&server, None),
            Duration::from_secs(5),
        );
        let err = backend.fetch(&mut TokenCache::new()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Parse(_)));
    }
}
