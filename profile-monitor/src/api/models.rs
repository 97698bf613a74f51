//! Snapshots produced by the profile API each cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Member of a tracked collection. Identity is `id` (a stable URI); `name`
/// is display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
}

impl Member {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Profile view of the monitored user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Display name.
    pub username: String,
    pub image_url: Option<String>,
    pub follower_count: u64,
    pub following_count: u64,
    /// Public playlists as (uri, name).
    pub playlists: Vec<Member>,
    pub recent_artists: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub uri: String,
    pub artist: String,
    pub title: String,
    pub duration_ms: u64,
    pub added_at: Option<String>,
    pub added_by: Option<Member>,
}

/// Fields that make a track entry distinct. Who added it is not part of it.
pub type TrackKey = (String, String, String, u64, Option<String>);

impl Track {
    pub fn identity(&self) -> TrackKey {
        (
            self.uri.clone(),
            self.artist.clone(),
            self.title.clone(),
            self.duration_ms,
            self.added_at.clone(),
        )
    }

    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistRecord {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub like_count: u64,
    pub track_count: u64,
    /// Users other than the owner who added tracks, id -> name.
    pub collaborators: BTreeMap<String, String>,
    pub tracks: Vec<Track>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PlaylistRecord {
    /// Derive collaborators from track `added_by`, excluding the owner.
    pub fn collect_collaborators(&mut self) {
        self.collaborators = self
            .tracks
            .iter()
            .filter_map(|t| t.added_by.as_ref())
            .filter(|m| !m.id.is_empty() && m.id != self.owner_id)
            .map(|m| (m.id.clone(), m.name.clone()))
            .collect();
    }
}

/// Downloaded profile picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    /// Upstream modification time (`Last-Modified`), if reported.
    pub last_modified: Option<DateTime<Utc>>,
}
