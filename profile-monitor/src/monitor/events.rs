//! Change events produced by the detector.
//!
//! Events are structured values; formatting for humans is left to sinks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::Member;

/// Tracked entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ProfileName,
    RecentArtists,
    Followers,
    Followings,
    Playlists,
    PlaylistLikes,
    PlaylistCollaborators,
    PlaylistTracks,
    PlaylistName,
    PlaylistDescription,
    ProfilePicture,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileName => "profile_name",
            Self::RecentArtists => "recent_artists",
            Self::Followers => "followers",
            Self::Followings => "followings",
            Self::Playlists => "playlists",
            Self::PlaylistLikes => "playlist_likes",
            Self::PlaylistCollaborators => "playlist_collaborators",
            Self::PlaylistTracks => "playlist_tracks",
            Self::PlaylistName => "playlist_name",
            Self::PlaylistDescription => "playlist_description",
            Self::ProfilePicture => "profile_picture",
        }
    }

    /// Kinds evaluated with the set hysteresis rules and persisted as
    /// `[count, members]` baselines.
    pub fn is_set(&self) -> bool {
        matches!(
            self,
            Self::RecentArtists | Self::Followers | Self::Followings | Self::Playlists
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A real difference between an entity and its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    /// What changed: the monitored user id, or a playlist name for
    /// playlist sub-diffs.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<Member>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Set when a positive count arrived after suppressed empty observations.
    #[serde(default)]
    pub recovered: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Membership change of a collection; old/new values carry the counts.
    pub fn membership(
        entity: EntityKind,
        subject: impl Into<String>,
        (old_count, new_count): (u64, u64),
        added: Vec<Member>,
        removed: Vec<Member>,
    ) -> Self {
        Self {
            entity,
            subject: subject.into(),
            added,
            removed,
            old_value: Some(old_count.to_string()),
            new_value: Some(new_count.to_string()),
            recovered: false,
            timestamp: Utc::now(),
        }
    }

    /// Scalar value change (name, description, like count, picture).
    pub fn value(
        entity: EntityKind,
        subject: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            entity,
            subject: subject.into(),
            added: Vec::new(),
            removed: Vec::new(),
            old_value,
            new_value,
            recovered: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// One-line description for logs.
    pub fn description(&self) -> String {
        let old = self.old_value.as_deref().unwrap_or("none");
        let new = self.new_value.as_deref().unwrap_or("none");
        if self.added.is_empty() && self.removed.is_empty() {
            format!("{} [{}]: {} -> {}", self.entity, self.subject, old, new)
        } else {
            format!(
                "{} [{}]: {} -> {} (+{}/-{})",
                self.entity,
                self.subject,
                old,
                new,
                self.added.len(),
                self.removed.len()
            )
        }
    }
}
