//! Binary (protobuf) login backend.
//!
//! The login endpoint trades a long-lived stored credential plus device and
//! system identifiers for an access token. Every login call must carry a
//! client token from a second endpoint; that token is cached for its whole
//! lifetime and replaced only when it expires or the login endpoint rejects it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use proto_codec::{
    ClientTokenRequest, LoginResponse, build_login_request, parse_client_token_response,
    parse_login_response,
};
use reqwest::{Client, StatusCode, header};
use tracing::{debug, info, instrument, warn};

use crate::config::BinaryLoginConfig;
use crate::credentials::error::CredentialError;
use crate::credentials::manager::TokenBackend;
use crate::credentials::types::{
    AccessToken, BackendKind, ClientToken, TokenCache, expiry_after_secs,
};

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
const CLIENT_TOKEN_HEADER: &str = "client-token";
/// Lifetime assumed when the client-token reply carries none.
const CLIENT_TOKEN_DEFAULT_TTL_SECS: u64 = 14 * 24 * 60 * 60;
const CLIENT_TOKEN_MARGIN_SECS: i64 = 60;
const DEFAULT_ACCESS_TTL_SECS: u64 = 3600;

/// Login error codes that mean the stored credential itself is bad.
const LOGIN_ERROR_INVALID_CREDENTIALS: u64 = 1;
const LOGIN_ERROR_UNKNOWN_IDENTIFIER: u64 = 5;

pub struct BinaryLoginBackend {
    client: Client,
    config: BinaryLoginConfig,
    timeout: Duration,
}

impl BinaryLoginBackend {
    pub fn new(client: Client, config: BinaryLoginConfig, timeout: Duration) -> Self {
        Self {
            client,
            config,
            timeout,
        }
    }

    fn client_token_request(&self) -> ClientTokenRequest {
        ClientTokenRequest {
            app_version: self.config.app_version.clone(),
            device_id: self.config.device_id.clone(),
            system_id: self.config.system_id.clone(),
            cpu_arch: self.config.cpu_arch,
            os_build: self.config.os_build,
            platform: self.config.platform,
            os_major: self.config.os_major,
            os_minor: self.config.os_minor,
            client_model: self.config.client_model,
        }
    }

    #[instrument(skip(self))]
    async fn fetch_client_token(&self) -> Result<ClientToken, CredentialError> {
        let response = self
            .client
            .post(&self.config.client_token_url)
            .header(header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .header(header::ACCEPT, PROTOBUF_CONTENT_TYPE)
            .body(self.client_token_request().encode())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::acquisition(
                BackendKind::BinaryLogin,
                format!("client-token endpoint returned HTTP {status}"),
            ));
        }

        let parsed = parse_client_token_response(&response.bytes().await?)?;
        let ttl = parsed
            .expires_after_seconds
            .unwrap_or(CLIENT_TOKEN_DEFAULT_TTL_SECS);
        let expires_at = expiry_after_secs(ttl)?;
        debug!(%expires_at, "Client token issued");

        Ok(ClientToken {
            value: parsed.token,
            expires_at,
        })
    }

    /// Cached client token, or a new one when missing or about to expire.
    async fn ensure_client_token(&self, cache: &mut TokenCache) -> Result<String, CredentialError> {
        let margin = chrono::Duration::seconds(CLIENT_TOKEN_MARGIN_SECS);
        if let Some(token) = cache.client_token.as_ref()
            && token.is_usable(margin, Utc::now())
        {
            return Ok(token.value.clone());
        }
        let token = self.fetch_client_token().await?;
        let value = token.value.clone();
        cache.client_token = Some(token);
        Ok(value)
    }

    async fn login(
        &self,
        client_token: &str,
        stored_credential: &str,
    ) -> Result<LoginResponse, CredentialError> {
        let body = build_login_request(
            &self.config.device_id,
            &self.config.system_id,
            &self.config.user_uri_id,
            stored_credential,
        );
        let response = self
            .client
            .post(&self.config.login_url)
            .header(header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .header(header::ACCEPT, PROTOBUF_CONTENT_TYPE)
            .header(CLIENT_TOKEN_HEADER, client_token)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(parse_login_response(&response.bytes().await?)?);
        }

        let text = response.text().await.unwrap_or_default();
        if is_client_token_rejection(status, &text) {
            return Err(CredentialError::ClientTokenInvalidOrExpired);
        }
        Err(CredentialError::acquisition(
            BackendKind::BinaryLogin,
            format!("login endpoint returned HTTP {status}"),
        ))
    }
}

/// 401, or 400/403 whose body talks about the client token.
fn is_client_token_rejection(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::UNAUTHORIZED {
        return true;
    }
    if status != StatusCode::BAD_REQUEST && status != StatusCode::FORBIDDEN {
        return false;
    }
    let body = body.to_ascii_lowercase();
    ["client token", "client-token", "client_token", "clienttoken"]
        .iter()
        .any(|needle| body.contains(needle))
}

#[async_trait]
impl TokenBackend for BinaryLoginBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::BinaryLogin
    }

    fn check_config(&self) -> Result<(), CredentialError> {
        let missing: Vec<&str> = [
            ("device_id", &self.config.device_id),
            ("system_id", &self.config.system_id),
            ("user_uri_id", &self.config.user_uri_id),
            ("refresh_token", &self.config.refresh_token),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CredentialError::Configuration(format!(
                "binary login is missing: {}",
                missing.join(", ")
            )))
        }
    }

    #[instrument(skip(self, cache))]
    async fn fetch(&self, cache: &mut TokenCache) -> Result<AccessToken, CredentialError> {
        let stored_credential = cache
            .refresh_token
            .clone()
            .unwrap_or_else(|| self.config.refresh_token.clone());

        let client_token = self.ensure_client_token(cache).await?;
        let response = match self.login(&client_token, &stored_credential).await {
            Err(CredentialError::ClientTokenInvalidOrExpired) => {
                warn!("Client token rejected, fetching a new one and retrying once");
                cache.clear_client_token();
                let client_token = self.ensure_client_token(cache).await?;
                self.login(&client_token, &stored_credential).await?
            }
            other => other?,
        };

        match response {
            LoginResponse::Ok {
                username,
                access_token,
                stored_credential: rotated,
                expires_in,
            } => {
                if let Some(rotated) = rotated.filter(|r| !r.is_empty()) {
                    debug!("Stored credential rotated");
                    cache.refresh_token = Some(rotated);
                }
                let ttl = expires_in.unwrap_or(DEFAULT_ACCESS_TTL_SECS);
                info!(%username, ttl_secs = ttl, "Binary login succeeded");
                Ok(AccessToken::new(
                    access_token,
                    expiry_after_secs(ttl)?,
                    BackendKind::BinaryLogin,
                    None,
                ))
            }
            LoginResponse::Error { code } => match code {
                LOGIN_ERROR_INVALID_CREDENTIALS | LOGIN_ERROR_UNKNOWN_IDENTIFIER => Err(
                    CredentialError::InvalidCredentials(format!("login rejected with code {code}")),
                ),
                _ => Err(CredentialError::acquisition(
                    BackendKind::BinaryLogin,
                    format!("login error code {code}"),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TokenBroker;
    use crate::utils::http_client::build_client;
    use proto_codec::ClientTokenResponse;
    use rstest::rstest;
    use std::sync::Arc;
    use wiremock::matchers::{body_bytes, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> BinaryLoginConfig {
        BinaryLoginConfig {
            device_id: "dev".into(),
            system_id: "sys".into(),
            user_uri_id: "user".into(),
            refresh_token: "stored".into(),
            login_url: format!("{}/v3/login", server.uri()),
            client_token_url: format!("{}/v1/clienttoken", server.uri()),
            ..Default::default()
        }
    }

    fn backend(server: &MockServer) -> BinaryLoginBackend {
        BinaryLoginBackend::new(
            build_client(Duration::from_secs(5)),
            config(server),
            Duration::from_secs(5),
        )
    }

    fn client_token_reply(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(
            ClientTokenResponse {
                token: token.into(),
                expires_after_seconds: Some(1_209_600),
            }
            .encode(),
        )
    }

    fn login_ok(token: &str, rotated: Option<&str>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(
            LoginResponse::Ok {
                username: "user".into(),
                access_token: token.into(),
                stored_credential: rotated.map(str::to_string),
                expires_in: Some(3600),
            }
            .encode(),
        )
    }

    #[rstest]
    #[case(StatusCode::UNAUTHORIZED, "", true)]
    #[case(StatusCode::BAD_REQUEST, "Invalid Client-Token header", true)]
    #[case(StatusCode::FORBIDDEN, "client token expired", true)]
    #[case(StatusCode::BAD_REQUEST, "malformed body", false)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, "client token", false)]
    fn test_client_token_rejection_detection(
        #[case] status: StatusCode,
        #[case] body: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(is_client_token_rejection(status, body), expected);
    }

    #[tokio::test]
    async fn test_rejected_client_token_is_refetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clienttoken"))
            .respond_with(client_token_reply("ct-1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/clienttoken"))
            .respond_with(client_token_reply("ct-2"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .and(header_eq("client-token", "ct-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .and(header_eq("client-token", "ct-2"))
            .and(header_eq("content-type", "application/x-protobuf"))
            .respond_with(login_ok("access-1", None))
            .expect(1)
            .mount(&server)
            .await;

        let mut cache = TokenCache::new();
        let auth = TokenBroker::new(Arc::new(backend(&server)))
            .get_token(&mut cache)
            .await
            .unwrap();

        assert_eq!(auth.bearer, "access-1");
        assert_eq!(auth.client_token.as_deref(), Some("ct-2"));
    }

    #[tokio::test]
    async fn test_second_rejection_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clienttoken"))
            .respond_with(client_token_reply("ct"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad client-token"))
            .expect(2)
            .mount(&server)
            .await;

        let err = backend(&server)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::ClientTokenInvalidOrExpired));
    }

    #[tokio::test]
    async fn test_client_token_reused_and_credential_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clienttoken"))
            .respond_with(client_token_reply("ct"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .and(body_bytes(build_login_request("dev", "sys", "user", "stored")))
            .respond_with(login_ok("access-1", Some("rotated")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .and(body_bytes(build_login_request("dev", "sys", "user", "rotated")))
            .respond_with(login_ok("access-2", None))
            .expect(1)
            .mount(&server)
            .await;

        let broker = TokenBroker::new(Arc::new(backend(&server)));
        let mut cache = TokenCache::new();

        assert_eq!(broker.get_token(&mut cache).await.unwrap().bearer, "access-1");
        assert_eq!(cache.refresh_token.as_deref(), Some("rotated"));

        broker.invalidate(&mut cache);
        assert_eq!(broker.get_token(&mut cache).await.unwrap().bearer, "access-2");
    }

    #[tokio::test]
    async fn test_login_error_code_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clienttoken"))
            .respond_with(client_token_reply("ct"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(LoginResponse::Error { code: 1 }.encode()),
            )
            .mount(&server)
            .await;

        let err = backend(&server)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap_err();
        assert!(err.requires_relogin());
    }

    #[tokio::test]
    async fn test_oversized_access_token_lifetime_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clienttoken"))
            .respond_with(client_token_reply("ct"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(
                    LoginResponse::Ok {
                        username: "user".into(),
                        access_token: "access".into(),
                        stored_credential: None,
                        expires_in: Some(1 << 62),
                    }
                    .encode(),
                ),
            )
            .mount(&server)
            .await;

        let err = backend(&server)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Parse(_)));
    }

    #[tokio::test]
    async fn test_oversized_client_token_lifetime_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clienttoken"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(
                    ClientTokenResponse {
                        token: "ct".into(),
                        expires_after_seconds: Some(u64::MAX),
                    }
                    .encode(),
                ),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/login"))
            .respond_with(login_ok("access", None))
            .expect(0)
            .mount(&server)
            .await;

        let err = backend(&server)
            .fetch(&mut TokenCache::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Parse(_)));
    }

    #[test]
    fn test_check_config_lists_missing() {
        let backend = BinaryLoginBackend::new(
            build_client(Duration::from_secs(5)),
            BinaryLoginConfig::default(),
            Duration::from_secs(5),
        );
        let message = backend.check_config().unwrap_err().to_string();
        assert!(message.contains("device_id"));
        assert!(message.contains("refresh_token"));
    }
}
