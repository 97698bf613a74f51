//! HTTP collaborator used by the poll loop.
//!
//! Every operation takes an explicit deadline covering the whole operation
//! (all pages included). The poll loop additionally races each call against
//! a watchdog.

pub mod client;
pub mod error;
pub mod models;

use std::time::Duration;

use async_trait::async_trait;

pub use client::WebApiClient;
pub use error::ApiError;
pub use models::{ImageBlob, Member, PlaylistRecord, ProfileSnapshot, Track, TrackKey};

use crate::credentials::ApiAuth;

#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn fetch_profile(
        &self,
        auth: &ApiAuth,
        user_id: &str,
        timeout: Duration,
    ) -> Result<ProfileSnapshot, ApiError>;

    async fn fetch_followers(
        &self,
        auth: &ApiAuth,
        user_id: &str,
        timeout: Duration,
    ) -> Result<Vec<Member>, ApiError>;

    async fn fetch_followings(
        &self,
        auth: &ApiAuth,
        user_id: &str,
        timeout: Duration,
    ) -> Result<Vec<Member>, ApiError>;

    async fn fetch_playlist(
        &self,
        auth: &ApiAuth,
        playlist_uri: &str,
        timeout: Duration,
    ) -> Result<PlaylistRecord, ApiError>;

    /// Unauthenticated image download.
    async fn download_image(&self, url: &str, timeout: Duration) -> Result<ImageBlob, ApiError>;
}
