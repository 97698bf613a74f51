//! Access-token acquisition.
//!
//! A [`TokenBroker`] wraps exactly one [`TokenBackend`], chosen at startup:
//! - `Cookie`: web-player token from the `sp_dc` cookie and a TOTP code
//! - `OAuthClientCredentials`: app-level OAuth token
//! - `OAuthAuthorizationCode`: user-level OAuth token (PKCE when no secret)
//! - `BinaryLogin`: protobuf login with a stored credential and client token
//!
//! All mutable token state lives in a [`TokenCache`] owned by the session.

pub mod broker;
pub mod error;
pub mod manager;
pub mod platforms;
pub mod store;
pub mod tracker;
pub mod types;

pub use broker::TokenBroker;
pub use error::CredentialError;
pub use manager::TokenBackend;
pub use platforms::create_backend;
pub use store::{CredentialStore, JsonFileStore, StoredToken};
pub use tracker::RefreshFailureTracker;
pub use types::{AccessToken, ApiAuth, BackendKind, ClientToken, TokenCache};
