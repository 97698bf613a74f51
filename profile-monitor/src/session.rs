//! Mutable state of one monitoring session.
//!
//! Owned by the caller of the poll loop and passed in by reference, so
//! several monitors (or tests) can run side by side in one process.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::api::PlaylistRecord;
use crate::credentials::{RefreshFailureTracker, TokenCache};
use crate::monitor::{EntityKind, FetchFailureTracker, ObservableSet, PictureBaseline};

#[derive(Debug)]
pub struct SessionState {
    pub tokens: TokenCache,
    /// One entry per tracked collection kind.
    pub sets: BTreeMap<EntityKind, ObservableSet>,
    /// Last good record per playlist URI, for sub-diffs.
    pub playlists: HashMap<String, PlaylistRecord>,
    pub fetch_failures: FetchFailureTracker,
    /// `None` until the first observation (or a persisted baseline) exists.
    pub picture: Option<PictureBaseline>,
    pub profile_name: Option<String>,
    /// Set while the profile lookup returns 404.
    pub profile_missing: bool,
    pub credential_failures: RefreshFailureTracker,
    pub cycles: u64,
    pub last_liveness: Option<Instant>,
}

impl SessionState {
    /// `suppression_window` bounds how long a failed entity fetch is kept
    /// from being reported as removed; one check interval.
    pub fn new(suppression_window: Duration) -> Self {
        Self {
            tokens: TokenCache::new(),
            sets: BTreeMap::new(),
            playlists: HashMap::new(),
            fetch_failures: FetchFailureTracker::new(suppression_window),
            picture: None,
            profile_name: None,
            profile_missing: false,
            credential_failures: RefreshFailureTracker::new(),
            cycles: 0,
            last_liveness: None,
        }
    }

    pub fn set(&self, kind: EntityKind) -> Option<&ObservableSet> {
        self.sets.get(&kind)
    }

    pub fn set_mut(&mut self, kind: EntityKind) -> &mut ObservableSet {
        self.sets
            .entry(kind)
            .or_insert_with(|| ObservableSet::new(kind))
    }
}
