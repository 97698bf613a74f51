//! Web-player cookie backend.
//!
//! Exchanges the `sp_dc` cookie plus a TOTP code for a short-lived web-player
//! token. The endpoint sometimes hands out tokens that other endpoints reject,
//! so every token is probed before use.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::totp;
use crate::config::CookieConfig;
use crate::credentials::error::CredentialError;
use crate::credentials::manager::TokenBackend;
use crate::credentials::types::{AccessToken, BackendKind, TokenCache};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebTokenResponse {
    access_token: Option<String>,
    access_token_expiration_timestamp_ms: Option<i64>,
    client_id: Option<String>,
    #[serde(default)]
    is_anonymous: bool,
}

pub struct CookieBackend {
    client: Client,
    config: CookieConfig,
    secret: Vec<u8>,
    timeout: Duration,
}

impl CookieBackend {
    pub fn new(client: Client, config: CookieConfig, timeout: Duration) -> Self {
        Self {
            client,
            config,
            secret: totp::embedded_secret(),
            timeout,
        }
    }

    /// Authoritative time from the `Date` header of an unauthenticated request.
    /// Falls back to the local clock when the header is missing or unparsable.
    async fn server_time(&self) -> DateTime<Utc> {
        let response = self
            .client
            .head(&self.config.server_time_url)
            .timeout(self.timeout)
            .send()
            .await;

        let parsed = response.ok().and_then(|r| {
            r.headers()
                .get(header::DATE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|dt| dt.with_timezone(&Utc))
        });

        parsed.unwrap_or_else(|| {
            debug!("Server time unavailable, using local clock");
            Utc::now()
        })
    }

    async fn request_token(
        &self,
        reason: &str,
        server_time: DateTime<Utc>,
    ) -> Result<AccessToken, CredentialError> {
        let local_code = totp::generate(&self.secret, Utc::now().timestamp().max(0) as u64)?;
        let server_code = totp::generate(&self.secret, server_time.timestamp().max(0) as u64)?;
        let version = totp::SECRET_VERSION.to_string();

        let response = self
            .client
            .get(&self.config.token_url)
            .query(&[
                ("reason", reason),
                ("productType", "web-player"),
                ("totp", local_code.as_str()),
                ("totpServer", server_code.as_str()),
                ("totpVer", version.as_str()),
            ])
            .header(header::COOKIE, format!("sp_dc={}", self.config.sp_dc))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::acquisition(
                BackendKind::Cookie,
                format!("token endpoint returned HTTP {status}"),
            ));
        }

        let body: WebTokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Parse(e.to_string()))?;

        if body.is_anonymous {
            return Err(CredentialError::InvalidCredentials(
                "sp_dc cookie was not accepted (anonymous token issued)".to_string(),
            ));
        }

        let value = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::Parse("token response without accessToken".into()))?;
        let expires_at = body
            .access_token_expiration_timestamp_ms
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| CredentialError::Parse("token response without expiry".into()))?;

        Ok(AccessToken::new(
            value,
            expires_at,
            BackendKind::Cookie,
            body.client_id,
        ))
    }

    /// Cheap authenticated GET; the token is good iff it returns 200.
    async fn probe(&self, token: &AccessToken) -> bool {
        match self
            .client
            .get(&self.config.probe_url)
            .bearer_auth(&token.value)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!(error = %e, "Token probe failed");
                false
            }
        }
    }

    /// One round: `transport` first, then `init` when the first token is
    /// unusable. Returns the last token and whether it passed the probe.
    async fn attempt(&self) -> Result<(AccessToken, bool), CredentialError> {
        let server_time = self.server_time().await;

        match self.request_token("transport", server_time).await {
            Ok(token) if self.probe(&token).await => return Ok((token, true)),
            Ok(_) => debug!("Transport token failed the probe, retrying with init"),
            Err(e) if e.requires_relogin() => return Err(e),
            Err(e) => debug!(error = %e, "Transport token request failed, retrying with init"),
        }

        let token = self.request_token("init", server_time).await?;
        let valid = self.probe(&token).await;
        Ok((token, valid))
    }
}

#[async_trait]
impl TokenBackend for CookieBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    fn check_config(&self) -> Result<(), CredentialError> {
        if self.config.sp_dc.trim().is_empty() {
            return Err(CredentialError::Configuration(
                "sp_dc cookie is not set".to_string(),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, _cache))]
    async fn fetch(&self, _cache: &mut TokenCache) -> Result<AccessToken, CredentialError> {
        let max_attempts = self.config.max_attempts.max(1);
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut last_token = None;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.attempt().await {
                Ok((token, true)) => {
                    debug!(attempt, "Web-player token validated");
                    return Ok(token);
                }
                Ok((token, false)) => {
                    debug!(attempt, "Web-player token failed validation");
                    last_token = Some(token);
                }
                Err(e) if e.requires_relogin() => return Err(e),
                Err(e) => {
                    debug!(attempt, error = %e, "Web-player token request failed");
                    last_error = Some(e);
                }
            }
            if attempt < max_attempts && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(token) = last_token {
            warn!(
                attempts = max_attempts,
                "Could not obtain a validated token, using the last one issued"
            );
            return Ok(token);
        }

        Err(CredentialError::acquisition(
            BackendKind::Cookie,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no token issued".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http_client::build_client;
    use crate::credentials::TokenBroker;
    use std::sync::Arc;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(token: &str) -> serde_json::Value {
        serde_json::json!({
            "accessToken": token,
            "accessTokenExpirationTimestampMs": (Utc::now() + chrono::Duration::hours(1)).timestamp_millis(),
            "clientId": "web-client",
            "isAnonymous": false,
        })
    }

    fn backend(server: &MockServer, max_attempts: u32) -> CookieBackend {
        let config = CookieConfig {
            sp_dc: "cookie-value".into(),
            token_url: format!("{}/api/token", server.uri()),
            server_time_url: format!("{}/", server.uri()),
            probe_url: format!("{}/v1/me", server.uri()),
            max_attempts,
            retry_delay_ms: 0,
        };
        CookieBackend::new(build_client(Duration::from_secs(5)), config, Duration::from_secs(5))
    }

    async fn mount_server_time(server: &MockServer) {
        Mock::given(method("HEAD"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("date", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_two_calls_in_window_hit_token_endpoint_once() {
        let server = MockServer::start().await;
        mount_server_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/token"))
            .and(query_param("reason", "transport"))
            .and(header_eq("cookie", "sp_dc=cookie-value"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("good")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let broker = TokenBroker::new(Arc::new(backend(&server, 3)));
        let mut cache = TokenCache::new();
        let first = broker.get_token(&mut cache).await.unwrap();
        let second = broker.get_token(&mut cache).await.unwrap();

        assert_eq!(first.bearer, "good");
        assert_eq!(second.client_id.as_deref(), Some("web-client"));
    }

    #[tokio::test]
    async fn test_invalid_transport_token_falls_back_to_init() {
        let server = MockServer::start().await;
        mount_server_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/token"))
            .and(query_param("reason", "transport"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("stale")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/token"))
            .and(query_param("reason", "init"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header_eq("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let token = backend(&server, 3)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap();
        assert_eq!(token.value, "fresh");
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_token() {
        let server = MockServer::start().await;
        mount_server_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("unverified")))
            .expect(4)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let token = backend(&server, 2)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap();
        assert_eq!(token.value, "unverified");
    }

    #[tokio::test]
    async fn test_endpoint_errors_surface_as_acquisition_failure() {
        let server = MockServer::start().await;
        mount_server_time(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = backend(&server, 2)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::TokenAcquisitionFailed {
                backend: BackendKind::Cookie,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_anonymous_token_means_bad_cookie() {
        let server = MockServer::start().await;
        mount_server_time(&server).await;
        let mut body = token_body("anon");
        body["isAnonymous"] = serde_json::Value::Bool(true);
        Mock::given(method("GET"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let err = backend(&server, 5)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap_err();
        assert!(err.requires_relogin());
    }
}
