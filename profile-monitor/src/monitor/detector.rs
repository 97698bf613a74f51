//! Collection change detection with empty-result hysteresis.
//!
//! The provider occasionally returns an empty collection for a user that
//! still has members. A drop to zero is only accepted after
//! `disappeared_threshold` consecutive empty observations.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::events::{ChangeEvent, EntityKind};
use crate::api::Member;

/// Persisted form of a collection baseline, stored as `[count, members]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, Vec<Member>)", into = "(u64, Vec<Member>)")]
pub struct SetBaseline {
    pub count: u64,
    pub members: Vec<Member>,
}

impl SetBaseline {
    pub fn new(count: u64, members: Vec<Member>) -> Self {
        Self { count, members }
    }
}

impl From<(u64, Vec<Member>)> for SetBaseline {
    fn from((count, members): (u64, Vec<Member>)) -> Self {
        Self { count, members }
    }
}

impl From<SetBaseline> for (u64, Vec<Member>) {
    fn from(baseline: SetBaseline) -> Self {
        (baseline.count, baseline.members)
    }
}

/// Result of feeding one observation into an [`ObservableSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// First observation without a baseline; recorded silently.
    Initialized,
    Unchanged,
    /// Count and membership unchanged, but empty observations were being
    /// suppressed. The streak has been reset.
    Recovered { after: u32 },
    /// Empty observation held back by hysteresis.
    Suppressed { streak: u32 },
    Changed(ChangeEvent),
}

impl SetOutcome {
    /// Whether the baseline was rewritten and needs persisting.
    pub fn baseline_changed(&self) -> bool {
        matches!(self, Self::Initialized | Self::Changed(_))
    }
}

/// One tracked collection and its accepted baseline.
#[derive(Debug, Clone)]
pub struct ObservableSet {
    kind: EntityKind,
    baseline: Option<SetBaseline>,
    zero_streak: u32,
}

impl ObservableSet {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            baseline: None,
            zero_streak: 0,
        }
    }

    pub fn with_baseline(kind: EntityKind, baseline: SetBaseline) -> Self {
        Self {
            kind,
            baseline: Some(baseline),
            zero_streak: 0,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn baseline(&self) -> Option<&SetBaseline> {
        self.baseline.as_ref()
    }

    pub fn zero_streak(&self) -> u32 {
        self.zero_streak
    }

    /// Compare an observation against the baseline and update it when the
    /// difference is accepted as real.
    pub fn observe(
        &mut self,
        subject: &str,
        count: u64,
        members: Vec<Member>,
        disappeared_threshold: u32,
    ) -> SetOutcome {
        let Some(baseline) = self.baseline.as_mut() else {
            self.baseline = Some(SetBaseline::new(count, members));
            self.zero_streak = 0;
            return SetOutcome::Initialized;
        };

        if count == baseline.count {
            if count == 0 {
                self.zero_streak = 0;
                return SetOutcome::Unchanged;
            }
            let (added, removed) = diff_members(&baseline.members, &members);
            let streak = std::mem::take(&mut self.zero_streak);
            if added.is_empty() && removed.is_empty() {
                return if streak > 0 {
                    SetOutcome::Recovered { after: streak }
                } else {
                    SetOutcome::Unchanged
                };
            }
            baseline.members = members;
            let mut event =
                ChangeEvent::membership(self.kind, subject, (count, count), added, removed);
            event.recovered = streak > 0;
            return SetOutcome::Changed(event);
        }

        if count == 0 {
            self.zero_streak += 1;
            if self.zero_streak < disappeared_threshold {
                debug!(
                    kind = %self.kind,
                    streak = self.zero_streak,
                    baseline = baseline.count,
                    "Empty observation suppressed"
                );
                return SetOutcome::Suppressed {
                    streak: self.zero_streak,
                };
            }
            let old = std::mem::take(baseline);
            self.zero_streak = 0;
            let event = ChangeEvent::membership(self.kind, subject, (old.count, 0), Vec::new(), old.members);
            return SetOutcome::Changed(event);
        }

        let (added, removed) = diff_members(&baseline.members, &members);
        let old_count = baseline.count;
        *baseline = SetBaseline::new(count, members);
        let streak = std::mem::take(&mut self.zero_streak);
        let mut event = ChangeEvent::membership(self.kind, subject, (old_count, count), added, removed);
        event.recovered = streak > 0;
        SetOutcome::Changed(event)
    }
}

/// `(new \ old, old \ new)` by member id, each in observation order.
pub fn diff_members(old: &[Member], new: &[Member]) -> (Vec<Member>, Vec<Member>) {
    let old_ids: HashSet<&str> = old.iter().map(|m| m.id.as_str()).collect();
    let new_ids: HashSet<&str> = new.iter().map(|m| m.id.as_str()).collect();

    let added = new
        .iter()
        .filter(|m| !old_ids.contains(m.id.as_str()))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|m| !new_ids.contains(m.id.as_str()))
        .cloned()
        .collect();
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn members(ids: &[&str]) -> Vec<Member> {
        ids.iter().map(|id| Member::new(*id, id.to_uppercase())).collect()
    }

    fn numbered(n: usize) -> Vec<Member> {
        (0..n)
            .map(|i| Member::new(format!("spotify:user:{i}"), format!("user {i}")))
            .collect()
    }

    #[test]
    fn test_first_observation_initializes_silently() {
        let mut set = ObservableSet::new(EntityKind::Followers);
        assert_eq!(set.observe("u", 2, members(&["a", "b"]), 3), SetOutcome::Initialized);
        assert_eq!(set.baseline().map(|b| b.count), Some(2));
    }

    #[test]
    fn test_hysteresis_accepts_zero_on_threshold() {
        let mut set =
            ObservableSet::with_baseline(EntityKind::Followers, SetBaseline::new(10, numbered(10)));

        assert_eq!(set.observe("u", 0, vec![], 3), SetOutcome::Suppressed { streak: 1 });
        assert_eq!(set.observe("u", 0, vec![], 3), SetOutcome::Suppressed { streak: 2 });
        assert_eq!(set.baseline().map(|b| b.count), Some(10));
        assert_eq!(set.baseline().map(|b| b.members.len()), Some(10));

        let SetOutcome::Changed(event) = set.observe("u", 0, vec![], 3) else {
            panic!("expected the third empty observation to be accepted");
        };
        assert_eq!(event.removed.len(), 10);
        assert!(event.added.is_empty());
        assert_eq!(event.old_value.as_deref(), Some("10"));
        assert_eq!(event.new_value.as_deref(), Some("0"));
        assert_eq!(set.baseline(), Some(&SetBaseline::default()));
        assert_eq!(set.zero_streak(), 0);

        assert_eq!(set.observe("u", 0, vec![], 3), SetOutcome::Unchanged);
    }

    #[test]
    fn test_equal_count_membership_change() {
        let mut set =
            ObservableSet::with_baseline(EntityKind::Followings, SetBaseline::new(2, members(&["a", "b"])));

        let SetOutcome::Changed(event) = set.observe("u", 2, members(&["a", "c"]), 3) else {
            panic!("expected a membership change");
        };
        assert_eq!(event.added, members(&["c"]));
        assert_eq!(event.removed, members(&["b"]));
        assert_eq!(set.baseline().map(|b| b.members.clone()), Some(members(&["a", "c"])));
    }

    #[test]
    fn test_recovery_after_suppressed_zero_is_flagged() {
        let mut set =
            ObservableSet::with_baseline(EntityKind::Playlists, SetBaseline::new(2, members(&["a", "b"])));
        assert_eq!(set.observe("u", 0, vec![], 3), SetOutcome::Suppressed { streak: 1 });

        let SetOutcome::Changed(event) = set.observe("u", 3, members(&["a", "b", "c"]), 3) else {
            panic!("expected a change");
        };
        assert!(event.recovered);
        assert_eq!(event.added, members(&["c"]));
        assert_eq!(set.zero_streak(), 0);
    }

    #[test]
    fn test_same_set_after_suppressed_zero_resets_streak() {
        let mut set =
            ObservableSet::with_baseline(EntityKind::Playlists, SetBaseline::new(2, members(&["a", "b"])));
        set.observe("u", 0, vec![], 3);
        set.observe("u", 0, vec![], 3);
        assert_eq!(
            set.observe("u", 2, members(&["b", "a"]), 3),
            SetOutcome::Recovered { after: 2 }
        );
        // Streak starts over, so two more empties are still suppressed.
        assert_eq!(set.observe("u", 0, vec![], 3), SetOutcome::Suppressed { streak: 1 });
    }

    #[rstest]
    #[case(&["a"], &["a", "b"], &["b"], &[])]
    #[case(&["a", "b"], &["a"], &[], &["b"])]
    #[case(&["a", "b"], &["c"], &["c"], &["a", "b"])]
    fn test_count_change_diffs_by_id(
        #[case] old: &[&str],
        #[case] new: &[&str],
        #[case] added: &[&str],
        #[case] removed: &[&str],
    ) {
        let mut set = ObservableSet::with_baseline(
            EntityKind::Followers,
            SetBaseline::new(old.len() as u64, members(old)),
        );
        let SetOutcome::Changed(event) = set.observe("u", new.len() as u64, members(new), 3) else {
            panic!("expected a change");
        };
        assert_eq!(event.added, members(added));
        assert_eq!(event.removed, members(removed));
        assert!(!event.recovered);
    }

    #[test]
    fn test_identity_is_id_not_name() {
        let old = vec![Member::new("spotify:artist:1", "Old Name")];
        let new = vec![Member::new("spotify:artist:1", "New Name")];
        let (added, removed) = diff_members(&old, &new);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn test_baseline_json_shape() {
        let baseline = SetBaseline::new(1, vec![Member::new("spotify:user:a", "A")]);
        let json = serde_json::to_string(&baseline).unwrap();
        assert_eq!(json, r#"[1,[{"id":"spotify:user:a","name":"A"}]]"#);
        let parsed: SetBaseline = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, baseline);
    }
}
