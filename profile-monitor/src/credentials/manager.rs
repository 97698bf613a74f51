//! Backend trait implemented once per auth protocol.

use async_trait::async_trait;

use super::CredentialError;
use super::types::{AccessToken, BackendKind, TokenCache};

/// One way of obtaining a bearer token.
///
/// Implementations keep no mutable state of their own: anything that must
/// survive between calls (refresh tokens, client tokens) lives in the
/// [`TokenCache`] the session passes in.
#[async_trait]
pub trait TokenBackend: Send + Sync {
    /// Backend identifier.
    fn kind(&self) -> BackendKind;

    /// Obtain a fresh access token from the provider.
    ///
    /// Called by the broker only when the cached token is missing, expiring
    /// or invalidated.
    async fn fetch(&self, cache: &mut TokenCache) -> Result<AccessToken, CredentialError>;

    /// Load persisted state into the cache. Called once per session, before
    /// the first cache lookup.
    async fn restore(&self, _cache: &mut TokenCache) {}

    /// Secondary client header to send alongside the bearer token.
    fn client_token(&self, cache: &TokenCache) -> Option<String> {
        cache.client_token.as_ref().map(|t| t.value.clone())
    }

    /// Startup check for static configuration. Errors here stop the process
    /// before the poll loop begins.
    fn check_config(&self) -> Result<(), CredentialError> {
        Ok(())
    }
}
