//! Credential error types.

use proto_codec::ProtoError;
use thiserror::Error;

use super::types::BackendKind;

/// Errors that can occur while obtaining or refreshing a token.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The backend could not produce a token.
    #[error("Token acquisition failed for {backend}: {cause}")]
    TokenAcquisitionFailed { backend: BackendKind, cause: String },

    /// A token was issued but the provider rejects it.
    #[error("Token rejected by the provider")]
    TokenInvalid,

    /// The binary login endpoint rejected the client token.
    #[error("Client token invalid or expired")]
    ClientTokenInvalidOrExpired,

    /// Encoding or decoding of a binary login message failed.
    #[error("Protobuf error: {0}")]
    Protobuf(#[from] ProtoError),

    /// A refresh is needed but no refresh token exists and interactive
    /// bootstrap is unavailable.
    #[error("Re-authorization required: {0}")]
    RequiresReauthorization(String),

    /// Static credentials were refused by the provider.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON parse error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or inconsistent backend configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CredentialError {
    pub fn acquisition(backend: BackendKind, cause: impl Into<String>) -> Self {
        Self::TokenAcquisitionFailed {
            backend,
            cause: cause.into(),
        }
    }

    /// Check if this error requires manual operator action.
    pub fn requires_relogin(&self) -> bool {
        matches!(
            self,
            Self::RequiresReauthorization(_) | Self::InvalidCredentials(_) | Self::Configuration(_)
        )
    }

    /// Check if this error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Parse(_)
                | Self::Json(_)
                | Self::TokenInvalid
                | Self::ClientTokenInvalidOrExpired
                | Self::TokenAcquisitionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CredentialError::RequiresReauthorization("no refresh token".into()).requires_relogin());
        assert!(CredentialError::InvalidCredentials("bad secret".into()).requires_relogin());
        assert!(!CredentialError::TokenInvalid.requires_relogin());
        assert!(CredentialError::TokenInvalid.is_transient());
        assert!(
            CredentialError::acquisition(BackendKind::Cookie, "HTTP 500").is_transient()
        );
        assert!(!CredentialError::Configuration("missing device id".into()).is_transient());
    }

    #[test]
    fn test_missing_field_message_lists_all_paths() {
        let err = CredentialError::from(ProtoError::MissingField {
            fields: vec!["100.1".into(), "100.2".into()],
        });
        let rendered = err.to_string();
        assert!(rendered.contains("100.1"));
        assert!(rendered.contains("100.2"));
    }
}
