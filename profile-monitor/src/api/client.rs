//! `reqwest` implementation of [`ProfileApi`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::ApiError;
use super::models::{ImageBlob, Member, PlaylistRecord, ProfileSnapshot, Track};
use super::ProfileApi;
use crate::config::ApiConfig;
use crate::credentials::ApiAuth;

const CLIENT_TOKEN_HEADER: &str = "client-token";
const PROFILE_PLAYLIST_LIMIT: u32 = 200;
const PROFILE_ARTIST_LIMIT: u32 = 50;
const PLAYLIST_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    followers_count: u64,
    #[serde(default)]
    following_count: u64,
    #[serde(default)]
    public_playlists: Vec<UriName>,
    #[serde(default)]
    recently_played_artists: Vec<UriName>,
}

#[derive(Debug, Deserialize)]
struct UriName {
    uri: String,
    #[serde(default)]
    name: String,
}

impl From<UriName> for Member {
    fn from(value: UriName) -> Self {
        Member::new(value.uri, value.name)
    }
}

#[derive(Debug, Deserialize)]
struct ProfileListResponse {
    #[serde(default)]
    profiles: Vec<UriName>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    uri: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    owner: UserRef,
    #[serde(default)]
    followers: Option<Total>,
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Total {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    items: Vec<PlaylistItem>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(default)]
    added_at: Option<String>,
    #[serde(default)]
    added_by: Option<UserRef>,
    #[serde(default)]
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    #[serde(default)]
    name: String,
}

impl PlaylistItem {
    fn into_track(self) -> Option<Track> {
        let track = self.track?;
        let artist = track
            .artists
            .into_iter()
            .map(|a| a.name)
            .collect::<Vec<_>>()
            .join(", ");
        Some(Track {
            uri: track.uri.unwrap_or_default(),
            artist,
            title: track.name,
            duration_ms: track.duration_ms,
            added_at: self.added_at,
            added_by: self.added_by.map(|u| {
                let name = u.display_name.unwrap_or_else(|| u.id.clone());
                Member::new(u.id, name)
            }),
        })
    }
}

/// Last path segment of `spotify:playlist:<id>` or a playlist URL.
pub fn playlist_id(uri: &str) -> &str {
    let trimmed = uri.split('?').next().unwrap_or(uri);
    trimmed
        .rsplit([':', '/'])
        .next()
        .unwrap_or(trimmed)
}

pub struct WebApiClient {
    client: Client,
    config: ApiConfig,
}

impl WebApiClient {
    pub fn new(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    fn authorized(&self, request: RequestBuilder, auth: &ApiAuth) -> RequestBuilder {
        let request = request.bearer_auth(&auth.bearer);
        match auth.client_token.as_deref() {
            Some(token) => request.header(CLIENT_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: &ApiAuth,
        deadline: Instant,
        endpoint: &str,
    ) -> Result<T, ApiError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let response = self
            .authorized(self.client.get(url), auth)
            .header(header::ACCEPT, "application/json")
            .timeout(remaining)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(endpoint.to_string())),
            status if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            }),
            _ => response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Parse(format!("{endpoint}: {e}"))),
        }
    }

    fn profile_url(&self, user_id: &str, suffix: &str) -> String {
        format!(
            "{}/user-profile-view/v3/profile/{}{}",
            self.config.spclient_base.trim_end_matches('/'),
            user_id,
            suffix
        )
    }

    async fn fetch_profile_list(
        &self,
        auth: &ApiAuth,
        user_id: &str,
        suffix: &str,
        timeout: Duration,
    ) -> Result<Vec<Member>, ApiError> {
        let url = format!("{}?market=from_token", self.profile_url(user_id, suffix));
        let list: ProfileListResponse = self
            .get_json(&url, auth, Instant::now() + timeout, suffix.trim_start_matches('/'))
            .await?;
        Ok(list.profiles.into_iter().map(Member::from).collect())
    }
}

#[async_trait]
impl ProfileApi for WebApiClient {
    #[instrument(skip(self, auth))]
    async fn fetch_profile(
        &self,
        auth: &ApiAuth,
        user_id: &str,
        timeout: Duration,
    ) -> Result<ProfileSnapshot, ApiError> {
        let url = format!(
            "{}?playlist_limit={PROFILE_PLAYLIST_LIMIT}&artist_limit={PROFILE_ARTIST_LIMIT}&episode_limit=0&market=from_token",
            self.profile_url(user_id, "")
        );
        let profile: ProfileResponse = self
            .get_json(&url, auth, Instant::now() + timeout, "profile")
            .await?;

        Ok(ProfileSnapshot {
            username: profile.name,
            image_url: profile.image_url.filter(|u| !u.is_empty()),
            follower_count: profile.followers_count,
            following_count: profile.following_count,
            playlists: profile
                .public_playlists
                .into_iter()
                .map(Member::from)
                .collect(),
            recent_artists: profile
                .recently_played_artists
                .into_iter()
                .map(Member::from)
                .collect(),
        })
    }

    #[instrument(skip(self, auth))]
    async fn fetch_followers(
        &self,
        auth: &ApiAuth,
        user_id: &str,
        timeout: Duration,
    ) -> Result<Vec<Member>, ApiError> {
        self.fetch_profile_list(auth, user_id, "/followers", timeout)
            .await
    }

    #[instrument(skip(self, auth))]
    async fn fetch_followings(
        &self,
        auth: &ApiAuth,
        user_id: &str,
        timeout: Duration,
    ) -> Result<Vec<Member>, ApiError> {
        self.fetch_profile_list(auth, user_id, "/following", timeout)
            .await
    }

    #[instrument(skip(self, auth))]
    async fn fetch_playlist(
        &self,
        auth: &ApiAuth,
        playlist_uri: &str,
        timeout: Duration,
    ) -> Result<PlaylistRecord, ApiError> {
        let deadline = Instant::now() + timeout;
        let url = format!(
            "{}/playlists/{}?limit={PLAYLIST_PAGE_SIZE}",
            self.config.web_api_base.trim_end_matches('/'),
            playlist_id(playlist_uri)
        );
        let playlist: PlaylistResponse = self.get_json(&url, auth, deadline, "playlist").await?;

        let mut items = playlist.tracks.items;
        let mut next = playlist.tracks.next;
        let mut pages = 1;
        while let Some(next_url) = next.take() {
            if pages >= self.config.max_playlist_pages {
                warn!(playlist = %playlist_uri, pages, "Stopping playlist paging at page limit");
                break;
            }
            let page: TrackPage = self
                .get_json(&next_url, auth, deadline, "playlist tracks")
                .await?;
            items.extend(page.items);
            next = page.next;
            pages += 1;
        }

        let tracks: Vec<Track> = items.into_iter().filter_map(PlaylistItem::into_track).collect();
        let added: Vec<DateTime<Utc>> = tracks
            .iter()
            .filter_map(|t| t.added_at.as_deref())
            .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .collect();
        debug!(playlist = %playlist_uri, tracks = tracks.len(), pages, "Playlist fetched");

        let mut record = PlaylistRecord {
            uri: playlist.uri,
            name: playlist.name,
            description: playlist.description.unwrap_or_default(),
            owner_id: playlist.owner.id,
            like_count: playlist.followers.map(|f| f.total).unwrap_or(0),
            track_count: playlist.tracks.total,
            collaborators: Default::default(),
            tracks,
            created_at: added.iter().min().copied(),
            updated_at: added.iter().max().copied(),
        };
        record.collect_collaborators();
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn download_image(&self, url: &str, timeout: Duration) -> Result<ImageBlob, ApiError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(ApiError::NotFound("image".to_string())),
            status if !status.is_success() => {
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    endpoint: "image".to_string(),
                });
            }
            _ => {}
        }
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let bytes = response.bytes().await?.to_vec();
        Ok(ImageBlob {
            bytes,
            last_modified,
        })
    }
}
