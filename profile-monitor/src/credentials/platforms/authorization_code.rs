//! OAuth authorization-code backend (user-level token).
//!
//! Bootstrap happens once: the operator opens the authorize URL, approves,
//! and pastes the redirect URL back. After that only refresh-token grants are
//! used. Without a client secret the flow uses PKCE.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::oauth::{self, ClientAuth};
use crate::config::AuthorizationCodeConfig;
use crate::credentials::error::CredentialError;
use crate::credentials::manager::TokenBackend;
use crate::credentials::store::{CredentialStore, JsonFileStore};
use crate::credentials::types::{AccessToken, BackendKind, TokenCache};

/// Source of the pasted callback URL during bootstrap.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Show `authorize_url` to the operator and return the URL they were
    /// redirected to.
    async fn prompt(&self, authorize_url: &str) -> Result<String, CredentialError>;
}

/// Prints the URL and reads one line from stdin.
pub struct StdinPrompt;

#[async_trait]
impl AuthorizationPrompt for StdinPrompt {
    async fn prompt(&self, authorize_url: &str) -> Result<String, CredentialError> {
        println!("Open this URL in a browser and approve access:\n\n  {authorize_url}\n");
        println!("Then paste the full URL you were redirected to:");
        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| CredentialError::Configuration(format!("prompt task failed: {e}")))??;
        Ok(line.trim().to_string())
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// 32 random bytes, base64url encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Opaque `state` value binding the redirect to this attempt.
fn generate_state() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Pull the authorization code out of a redirect URL, checking `state`.
pub fn parse_callback(callback: &str, expected_state: &str) -> Result<String, CredentialError> {
    let url = Url::parse(callback)
        .map_err(|e| CredentialError::Parse(format!("callback URL: {e}")))?;
    let query = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(error) = query("error") {
        return Err(CredentialError::RequiresReauthorization(format!(
            "authorization denied: {error}"
        )));
    }
    if query("state").as_deref() != Some(expected_state) {
        return Err(CredentialError::RequiresReauthorization(
            "state mismatch in callback URL".to_string(),
        ));
    }
    query("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CredentialError::Parse("callback URL has no code".to_string()))
}

pub struct AuthorizationCodeBackend {
    client: Client,
    config: AuthorizationCodeConfig,
    store: Option<Arc<dyn CredentialStore>>,
    prompt: Option<Arc<dyn AuthorizationPrompt>>,
    timeout: Duration,
}

impl AuthorizationCodeBackend {
    pub fn new(client: Client, config: AuthorizationCodeConfig, timeout: Duration) -> Self {
        let store = config
            .cache_path
            .clone()
            .map(|p| Arc::new(JsonFileStore::new(p)) as Arc<dyn CredentialStore>);
        let prompt = config
            .interactive
            .then(|| Arc::new(StdinPrompt) as Arc<dyn AuthorizationPrompt>);
        Self {
            client,
            config,
            store,
            prompt,
            timeout,
        }
    }

    /// Replace the interactive prompt; `None` disables bootstrap.
    pub fn with_prompt(mut self, prompt: Option<Arc<dyn AuthorizationPrompt>>) -> Self {
        self.prompt = prompt;
        self
    }

    fn client_auth(&self) -> ClientAuth<'_> {
        match self.config.client_secret.as_deref() {
            Some(secret) if !secret.is_empty() => ClientAuth::Basic {
                id: &self.config.client_id,
                secret,
            },
            _ => ClientAuth::Public {
                id: &self.config.client_id,
            },
        }
    }

    fn uses_pkce(&self) -> bool {
        matches!(self.client_auth(), ClientAuth::Public { .. })
    }

    pub fn authorize_url(&self, state: &str, pkce: Option<&Pkce>) -> Result<Url, CredentialError> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", self.config.scopes.as_str()),
            ("state", state),
        ];
        if let Some(pkce) = pkce {
            params.push(("code_challenge_method", "S256"));
            params.push(("code_challenge", pkce.challenge.as_str()));
        }
        Url::parse_with_params(&self.config.authorize_url, &params)
            .map_err(|e| CredentialError::Configuration(format!("authorize URL: {e}")))
    }

    async fn refresh(
        &self,
        refresh_token: &str,
    ) -> Result<(AccessToken, Option<String>), CredentialError> {
        debug!("Refreshing user token");
        let response = oauth::request_token(
            &self.client,
            &self.config.token_url,
            self.kind(),
            self.client_auth(),
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            self.timeout,
        )
        .await?;
        response.into_access_token(self.kind(), &self.config.client_id)
    }

    async fn bootstrap(
        &self,
        prompt: &dyn AuthorizationPrompt,
    ) -> Result<(AccessToken, Option<String>), CredentialError> {
        let state = generate_state();
        let pkce = self.uses_pkce().then(Pkce::generate);
        let url = self.authorize_url(&state, pkce.as_ref())?;

        info!(pkce = pkce.is_some(), "Starting interactive authorization");
        let callback = prompt.prompt(url.as_str()).await?;
        let code = parse_callback(&callback, &state)?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(pkce) = pkce.as_ref() {
            form.push(("code_verifier", pkce.verifier.as_str()));
        }
        let response = oauth::request_token(
            &self.client,
            &self.config.token_url,
            self.kind(),
            self.client_auth(),
            &form,
            self.timeout,
        )
        .await?;
        response.into_access_token(self.kind(), &self.config.client_id)
    }
}

#[async_trait]
impl TokenBackend for AuthorizationCodeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OAuthAuthorizationCode
    }

    fn check_config(&self) -> Result<(), CredentialError> {
        if self.config.client_id.is_empty() {
            return Err(CredentialError::Configuration(
                "client id is required".to_string(),
            ));
        }
        Url::parse(&self.config.redirect_uri)
            .map_err(|e| CredentialError::Configuration(format!("redirect URI: {e}")))?;
        Ok(())
    }

    async fn restore(&self, cache: &mut TokenCache) {
        oauth::hydrate(self.store.as_ref(), cache, self.kind(), &self.config.client_id).await;
    }

    #[instrument(skip(self, cache))]
    async fn fetch(&self, cache: &mut TokenCache) -> Result<AccessToken, CredentialError> {
        if let Some(refresh_token) = cache.refresh_token.clone() {
            match self.refresh(&refresh_token).await {
                Ok((token, rotated)) => {
                    if let Some(rotated) = rotated {
                        cache.refresh_token = Some(rotated);
                    }
                    oauth::persist(self.store.as_ref(), &token, cache.refresh_token.as_ref()).await;
                    return Ok(token);
                }
                Err(e) if e.requires_relogin() => {
                    warn!(error = %e, "Refresh token rejected, falling back to bootstrap");
                    cache.refresh_token = None;
                }
                Err(e) => return Err(e),
            }
        }

        let Some(prompt) = self.prompt.as_deref() else {
            return Err(CredentialError::RequiresReauthorization(
                "no refresh token and interactive authorization is disabled".to_string(),
            ));
        };

        let (token, refresh_token) = self.bootstrap(prompt).await?;
        cache.refresh_token = refresh_token;
        oauth::persist(self.store.as_ref(), &token, cache.refresh_token.as_ref()).await;
        Ok(token)
    }
}
