//! Per-playlist sub-diffs.
//!
//! Evaluated for every playlist fetched in both the previous and current
//! cycle, independently of the playlist set itself.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use super::events::{ChangeEvent, EntityKind};
use crate::api::{Member, PlaylistRecord, Track, TrackKey};

/// All differences between two records of the same playlist.
pub fn diff_playlist(
    old: &PlaylistRecord,
    new: &PlaylistRecord,
    now: DateTime<Utc>,
) -> Vec<ChangeEvent> {
    let subject = if new.name.is_empty() {
        new.uri.clone()
    } else {
        new.name.clone()
    };
    let mut events = Vec::new();

    if old.like_count != new.like_count {
        events.push(ChangeEvent::value(
            EntityKind::PlaylistLikes,
            subject.as_str(),
            Some(old.like_count.to_string()),
            Some(new.like_count.to_string()),
        ));
    }

    let (added, removed) = diff_collaborators(&old.collaborators, &new.collaborators);
    if !added.is_empty() || !removed.is_empty() {
        events.push(ChangeEvent::membership(
            EntityKind::PlaylistCollaborators,
            subject.as_str(),
            (old.collaborators.len() as u64, new.collaborators.len() as u64),
            added,
            removed,
        ));
    }

    let (added, removed) = diff_tracks(&old.tracks, &new.tracks);
    if !added.is_empty() || !removed.is_empty() {
        events.push(ChangeEvent::membership(
            EntityKind::PlaylistTracks,
            subject.as_str(),
            (old.track_count, new.track_count),
            added,
            removed,
        ));
    }

    if old.name != new.name {
        events.push(ChangeEvent::value(
            EntityKind::PlaylistName,
            subject.as_str(),
            Some(old.name.clone()),
            Some(new.name.clone()),
        ));
    }

    if old.description != new.description {
        events.push(ChangeEvent::value(
            EntityKind::PlaylistDescription,
            subject.as_str(),
            Some(old.description.clone()),
            Some(new.description.clone()),
        ));
    }

    events
        .into_iter()
        .map(|event| event.with_timestamp(now))
        .collect()
}

fn diff_collaborators(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> (Vec<Member>, Vec<Member>) {
    let added = new
        .iter()
        .filter(|(id, _)| !old.contains_key(*id))
        .map(|(id, name)| Member::new(id.as_str(), name.as_str()))
        .collect();
    let removed = old
        .iter()
        .filter(|(id, _)| !new.contains_key(*id))
        .map(|(id, name)| Member::new(id.as_str(), name.as_str()))
        .collect();
    (added, removed)
}

/// Tracks are reported as members keyed by URI and labelled "artist - title".
fn diff_tracks(old: &[Track], new: &[Track]) -> (Vec<Member>, Vec<Member>) {
    let old_keys: HashSet<TrackKey> = old.iter().map(Track::identity).collect();
    let new_keys: HashSet<TrackKey> = new.iter().map(Track::identity).collect();

    let to_member = |t: &Track| Member::new(t.uri.as_str(), t.label());
    let added = new
        .iter()
        .filter(|t| !old_keys.contains(&t.identity()))
        .map(to_member)
        .collect();
    let removed = old
        .iter()
        .filter(|t| !new_keys.contains(&t.identity()))
        .map(to_member)
        .collect();
    (added, removed)
}
