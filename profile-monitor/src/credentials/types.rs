//! Token types and the per-session token cache.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::CredentialError;

/// The mutually exclusive ways of obtaining an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Cookie,
    OAuthClientCredentials,
    OAuthAuthorizationCode,
    BinaryLogin,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::OAuthClientCredentials => "oauth_client_credentials",
            Self::OAuthAuthorizationCode => "oauth_authorization_code",
            Self::BinaryLogin => "binary_login",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cookie" => Ok(Self::Cookie),
            "oauth_client_credentials" | "client_credentials" => Ok(Self::OAuthClientCredentials),
            "oauth_authorization_code" | "authorization_code" | "oauth_user" => {
                Ok(Self::OAuthAuthorizationCode)
            }
            "binary_login" | "login5" => Ok(Self::BinaryLogin),
            other => Err(format!("unknown auth backend '{other}'")),
        }
    }
}

/// Absolute expiry for a lifetime reported by the provider.
///
/// Lifetimes that do not fit a timestamp are a parse error.
pub(crate) fn expiry_after_secs<T>(ttl_secs: T) -> Result<DateTime<Utc>, CredentialError>
where
    T: TryInto<i64> + Copy + fmt::Display,
{
    ttl_secs
        .try_into()
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| CredentialError::Parse(format!("token lifetime of {ttl_secs}s is out of range")))
}

/// A bearer token issued by one backend.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub backend: BackendKind,
    /// Client id the provider associated with the token, when it reports one.
    pub client_id: Option<String>,
}

impl AccessToken {
    pub fn new(
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
        backend: BackendKind,
        client_id: Option<String>,
    ) -> Self {
        Self {
            value: value.into(),
            expires_at,
            backend,
            client_id,
        }
    }

    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Usable while `expires_at - margin` is still in the future.
    #[inline]
    pub fn is_usable(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("backend", &self.backend)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Secondary credential required by the binary login endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl ClientToken {
    #[inline]
    pub fn is_usable(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin > now
    }
}

impl fmt::Debug for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token state owned by the session and handed to the broker by reference.
///
/// A broker drives exactly one backend, so a cache never mixes state from
/// two backends.
#[derive(Default, Clone)]
pub struct TokenCache {
    pub access: Option<AccessToken>,
    pub client_token: Option<ClientToken>,
    /// Latest refresh credential (OAuth refresh token or rotated login credential).
    pub refresh_token: Option<String>,
    /// Whether the backend has already restored persisted state.
    pub restored: bool,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_access(&mut self) {
        self.access = None;
    }

    pub fn clear_client_token(&mut self) {
        self.client_token = None;
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("access", &self.access)
            .field("client_token", &self.client_token)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Credentials attached to every downstream API call.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiAuth {
    pub bearer: String,
    pub client_id: Option<String>,
    pub client_token: Option<String>,
}

impl fmt::Debug for ApiAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiAuth")
            .field("bearer", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("has_client_token", &self.client_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("cookie", BackendKind::Cookie)]
    #[case("client_credentials", BackendKind::OAuthClientCredentials)]
    #[case("oauth-authorization-code", BackendKind::OAuthAuthorizationCode)]
    #[case("BINARY_LOGIN", BackendKind::BinaryLogin)]
    fn test_backend_kind_parse(#[case] input: &str, #[case] expected: BackendKind) {
        assert_eq!(input.parse::<BackendKind>().unwrap(), expected);
    }

    #[test]
    fn test_backend_kind_parse_rejects_unknown() {
        assert!("password".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_token_usable_respects_margin() {
        let now = Utc::now();
        let token = AccessToken::new("t", now + Duration::seconds(90), BackendKind::Cookie, None);
        assert!(token.is_usable(Duration::seconds(60), now));
        assert!(!token.is_usable(Duration::seconds(120), now));
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + Duration::seconds(90)));
    }

    #[test]
    fn test_expiry_after_secs_in_range() {
        let before = Utc::now();
        let expires_at = expiry_after_secs(3600_u64).unwrap();
        assert!(expires_at >= before + Duration::seconds(3600));
        assert!(expires_at <= Utc::now() + Duration::seconds(3600));
    }

    #[rstest]
    #[case(u64::MAX)]
    #[case(1 << 62)]
    fn test_expiry_after_secs_rejects_huge_u64(#[case] ttl: u64) {
        assert!(matches!(expiry_after_secs(ttl), Err(CredentialError::Parse(_))));
    }

    #[test]
    fn test_expiry_after_secs_rejects_huge_i64() {
        assert!(matches!(expiry_after_secs(i64::MAX), Err(CredentialError::Parse(_))));
        assert!(matches!(expiry_after_secs(i64::MIN), Err(CredentialError::Parse(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = AccessToken::new(
            "super-secret",
            Utc::now(),
            BackendKind::BinaryLogin,
            Some("cid".into()),
        );
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("cid"));
    }
}
