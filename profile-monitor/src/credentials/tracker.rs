//! Consecutive credential failure tracking.
//!
//! Used to alert the operator once per failure streak instead of once per cycle.

#[derive(Debug, Default, Clone)]
pub struct RefreshFailureTracker {
    count: u32,
    notified: bool,
}

impl RefreshFailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the updated count.
    pub fn record_failure(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    /// Returns `true` the first time it is called within a failure streak.
    pub fn take_notification(&mut self) -> bool {
        if self.count == 0 || self.notified {
            return false;
        }
        self.notified = true;
        true
    }

    /// Clear failures on success. Returns the length of the streak that ended.
    pub fn clear(&mut self) -> u32 {
        let ended = self.count;
        *self = Self::default();
        ended
    }

    pub fn failure_count(&self) -> u32 {
        self.count
    }
}
