//! Token broker: hands out a non-expired bearer token from one backend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};

use super::CredentialError;
use super::manager::TokenBackend;
use super::types::{ApiAuth, BackendKind, TokenCache};

/// Default time before expiry at which a cached token is replaced.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;

pub struct TokenBroker {
    backend: Arc<dyn TokenBackend>,
    refresh_margin: Duration,
}

impl TokenBroker {
    pub fn new(backend: Arc<dyn TokenBackend>) -> Self {
        Self {
            backend,
            refresh_margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
        }
    }

    pub fn with_refresh_margin(mut self, margin: std::time::Duration) -> Self {
        self.refresh_margin = Duration::from_std(margin)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS));
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn check_config(&self) -> Result<(), CredentialError> {
        self.backend.check_config()
    }

    /// Return credentials for downstream calls.
    ///
    /// Reuses the cached token while it is outside the refresh margin, so
    /// repeated calls within one validity window hit the network at most once.
    #[instrument(skip(self, cache), fields(backend = %self.kind()))]
    pub async fn get_token(&self, cache: &mut TokenCache) -> Result<ApiAuth, CredentialError> {
        if !cache.restored {
            self.backend.restore(cache).await;
            cache.restored = true;
        }

        if let Some(token) = cache.access.as_ref()
            && token.is_usable(self.refresh_margin, Utc::now())
        {
            return Ok(self.build_auth(cache));
        }

        debug!("Cached token missing or expiring, fetching a new one");
        let token = self.backend.fetch(cache).await?;

        if token.is_expired(Utc::now()) {
            warn!(expires_at = %token.expires_at, "Backend returned an already expired token");
            return Err(CredentialError::TokenInvalid);
        }
        if !token.is_usable(self.refresh_margin, Utc::now()) {
            debug!(
                expires_at = %token.expires_at,
                "Token lifetime is shorter than the refresh margin"
            );
        }

        info!(expires_at = %token.expires_at, "Access token refreshed");
        cache.access = Some(token);
        Ok(self.build_auth(cache))
    }

    /// Drop the cached access token, e.g. after a 401 from a downstream call.
    pub fn invalidate(&self, cache: &mut TokenCache) {
        if cache.access.take().is_some() {
            debug!(backend = %self.kind(), "Access token invalidated");
        }
    }

    fn build_auth(&self, cache: &TokenCache) -> ApiAuth {
        let (bearer, client_id) = cache
            .access
            .as_ref()
            .map(|t| (t.value.clone(), t.client_id.clone()))
            .unwrap_or_default();
        ApiAuth {
            bearer,
            client_id,
            client_token: self.backend.client_token(cache),
        }
    }
}
