//! Token-endpoint plumbing shared by the two OAuth backends.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::credentials::error::CredentialError;
use crate::credentials::store::{CredentialStore, StoredToken};
use crate::credentials::types::{AccessToken, BackendKind, TokenCache, expiry_after_secs};

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client authentication on the token endpoint.
pub(crate) enum ClientAuth<'a> {
    /// HTTP basic with id and secret.
    Basic { id: &'a str, secret: &'a str },
    /// Public client (PKCE): id travels in the form body.
    Public { id: &'a str },
}

const DEFAULT_EXPIRES_IN: i64 = 3600;

pub(crate) async fn request_token(
    client: &Client,
    url: &str,
    backend: BackendKind,
    auth: ClientAuth<'_>,
    form: &[(&str, &str)],
    timeout: Duration,
) -> Result<TokenResponse, CredentialError> {
    let mut fields: Vec<(&str, &str)> = form.to_vec();
    let mut request = client.post(url).timeout(timeout);
    match auth {
        ClientAuth::Basic { id, secret } => request = request.basic_auth(id, Some(secret)),
        ClientAuth::Public { id } => fields.push(("client_id", id)),
    }

    let response = request.form(&fields).send().await?;
    let status = response.status();
    if status.is_success() {
        return response
            .json::<TokenResponse>()
            .await
            .map_err(|e| CredentialError::Parse(e.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    let parsed: Option<TokenErrorResponse> = serde_json::from_str(&body).ok();
    let (code, description) = parsed
        .map(|e| (e.error, e.error_description.unwrap_or_default()))
        .unwrap_or_default();

    match (status, code.as_str()) {
        (StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED, "invalid_client") => Err(
            CredentialError::InvalidCredentials(format!("invalid_client: {description}")),
        ),
        (StatusCode::BAD_REQUEST, "invalid_grant") => Err(
            CredentialError::RequiresReauthorization(format!("invalid_grant: {description}")),
        ),
        _ => Err(CredentialError::acquisition(
            backend,
            format!("token endpoint returned HTTP {status} {code}"),
        )),
    }
}

impl TokenResponse {
    pub(crate) fn into_access_token(
        self,
        backend: BackendKind,
        client_id: &str,
    ) -> Result<(AccessToken, Option<String>), CredentialError> {
        let expires_at = expiry_after_secs(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN))?;
        Ok((
            AccessToken::new(
                self.access_token,
                expires_at,
                backend,
                Some(client_id.to_string()),
            ),
            self.refresh_token,
        ))
    }
}

/// Seed the session cache from the persisted token, if any.
pub(crate) async fn hydrate(
    store: Option<&Arc<dyn CredentialStore>>,
    cache: &mut TokenCache,
    backend: BackendKind,
    client_id: &str,
) {
    let Some(store) = store else {
        return;
    };
    match store.load().await {
        Ok(Some(stored)) => {
            debug!(expires_at = %stored.expires_at, "Using persisted OAuth token");
            if cache.refresh_token.is_none() {
                cache.refresh_token = stored.refresh_token;
            }
            cache.access = Some(AccessToken::new(
                stored.access_token,
                stored.expires_at,
                backend,
                Some(client_id.to_string()),
            ));
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Ignoring unreadable OAuth token cache"),
    }
}

/// Write the latest token to disk; failures are logged, not fatal.
pub(crate) async fn persist(
    store: Option<&Arc<dyn CredentialStore>>,
    token: &AccessToken,
    refresh_token: Option<&String>,
) {
    let Some(store) = store else {
        return;
    };
    let stored = StoredToken {
        access_token: token.value.clone(),
        refresh_token: refresh_token.cloned(),
        expires_at: token.expires_at,
    };
    if let Err(e) = store.save(&stored).await {
        warn!(error = %e, "Failed to persist OAuth token (non-fatal)");
    }
}
