//! Per-entity fetch failure suppression.
//!
//! When a single entity (one playlist) fails to fetch, it is kept in the
//! observed set from its last good record for one suppression window, so a
//! provider error is not reported as a removal.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// An unbroken run of failed fetches for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureStreak {
    pub first: DateTime<Utc>,
    pub count: u32,
    pub last_error: String,
}

#[derive(Debug, Clone)]
pub struct FetchFailureTracker {
    window: chrono::Duration,
    failures: HashMap<String, FailureStreak>,
}

impl FetchFailureTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            failures: HashMap::new(),
        }
    }

    /// Record a failed fetch and return the length of the failure streak.
    pub fn record(&mut self, id: &str, error: &str, now: DateTime<Utc>) -> u32 {
        let entry = self
            .failures
            .entry(id.to_string())
            .or_insert_with(|| FailureStreak {
                first: now,
                count: 0,
                last_error: String::new(),
            });
        entry.count += 1;
        entry.last_error = error.to_string();
        entry.count
    }

    /// Whether a removal of `id` would be caused by a failure that started
    /// less than one window ago.
    pub fn is_suppressed(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.failures
            .get(id)
            .is_some_and(|f| now.signed_duration_since(f.first) < self.window)
    }

    /// Forget `id` after a good fetch, returning the streak that ended.
    pub fn clear(&mut self, id: &str) -> Option<FailureStreak> {
        self.failures.remove(id)
    }

    /// Forget entities that are no longer listed upstream.
    pub fn retain_ids<'a>(&mut self, live: impl IntoIterator<Item = &'a str>) {
        let live: std::collections::HashSet<&str> = live.into_iter().collect();
        self.failures.retain(|id, _| live.contains(id.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_is_suppressed_for_one_window() {
        let mut tracker = FetchFailureTracker::new(Duration::from_secs(1800));
        let t0 = Utc::now();

        assert_eq!(tracker.record("p1", "HTTP 502", t0), 1);
        assert!(tracker.is_suppressed("p1", t0));
        assert!(tracker.is_suppressed("p1", t0 + chrono::Duration::seconds(1799)));

        // Next cycle starts at least one interval later.
        let t1 = t0 + chrono::Duration::seconds(1800);
        assert_eq!(tracker.record("p1", "HTTP 502", t1), 2);
        assert!(!tracker.is_suppressed("p1", t1));
    }

    #[test]
    fn test_success_clears_failure() {
        let mut tracker = FetchFailureTracker::new(Duration::from_secs(60));
        let now = Utc::now();
        tracker.record("p1", "timeout", now);
        tracker.record("p1", "HTTP 503", now);

        let ended = tracker.clear("p1").unwrap();
        assert_eq!(ended.count, 2);
        assert_eq!(ended.first, now);
        assert_eq!(ended.last_error, "HTTP 503");
        assert!(!tracker.is_suppressed("p1", now));
        assert!(tracker.clear("p1").is_none());
    }

    #[test]
    fn test_retain_drops_entities_no_longer_listed() {
        let mut tracker = FetchFailureTracker::new(Duration::from_secs(60));
        let now = Utc::now();
        tracker.record("p1", "x", now);
        tracker.record("p2", "x", now);
        tracker.retain_ids(["p2"]);
        assert!(!tracker.is_suppressed("p1", now));
        assert!(tracker.is_suppressed("p2", now));
    }
}
