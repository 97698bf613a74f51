//! Profile monitor: change detection and the poll loop.
//!
//! The monitor is responsible for:
//! - Deciding whether a difference from baseline is real or a provider glitch
//! - Playlist sub-diffs (likes, collaborators, tracks, name, description)
//! - Profile picture tracking
//! - Keeping one failed entity fetch from looking like a removal
//! - Driving the cycle and emitting events to the notification sink

mod detector;
mod events;
mod glitch;
mod picture;
mod playlist;
mod service;

pub use detector::{ObservableSet, SetBaseline, SetOutcome, diff_members};
pub use events::{ChangeEvent, EntityKind};
pub use glitch::{FailureStreak, FetchFailureTracker};
pub use picture::{PictureBaseline, PictureChange, compare_picture, picture_event};
pub use playlist::diff_playlist;
pub use service::{CycleReport, PollSettings, ProfileMonitor};
