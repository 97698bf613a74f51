//! Backend implementations, one per auth protocol.

pub mod authorization_code;
pub mod binary_login;
pub mod client_credentials;
pub mod cookie;
mod oauth;
pub mod totp;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

pub use authorization_code::{AuthorizationCodeBackend, AuthorizationPrompt, Pkce, StdinPrompt};
pub use binary_login::BinaryLoginBackend;
pub use client_credentials::ClientCredentialsBackend;
pub use cookie::CookieBackend;

use super::manager::TokenBackend;
use super::types::BackendKind;
use crate::config::MonitorConfig;

/// Build the backend selected in the configuration.
pub fn create_backend(config: &MonitorConfig, client: Client) -> Arc<dyn TokenBackend> {
    let timeout: Duration = config.request_timeout();
    match config.backend {
        BackendKind::Cookie => Arc::new(CookieBackend::new(client, config.cookie.clone(), timeout)),
        BackendKind::OAuthClientCredentials => Arc::new(ClientCredentialsBackend::new(
            client,
            config.client_credentials.clone(),
            timeout,
        )),
        BackendKind::OAuthAuthorizationCode => Arc::new(AuthorizationCodeBackend::new(
            client,
            config.authorization_code.clone(),
            timeout,
        )),
        BackendKind::BinaryLogin => Arc::new(BinaryLoginBackend::new(
            client,
            config.binary_login.clone(),
            timeout,
        )),
    }
}
