//! profile-monitor library crate.
//!
//! Polls one user profile and reports real changes to followers,
//! followings, playlists, recently played artists, display name and picture.

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod panic_hook;
pub mod session;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
pub use session::SessionState;
