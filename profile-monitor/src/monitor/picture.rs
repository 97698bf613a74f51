//! Profile picture tracking.

use chrono::{DateTime, Utc};

use super::events::{ChangeEvent, EntityKind};
use crate::api::ImageBlob;

/// Last accepted picture. `image` is `None` when the profile had no picture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PictureBaseline {
    pub image: Option<ImageBlob>,
}

impl PictureBaseline {
    pub fn new(image: Option<ImageBlob>) -> Self {
        Self { image }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureChange {
    Unchanged,
    Added,
    Removed,
    Changed,
}

impl PictureChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
        }
    }
}

/// Classify the transition from `previous` to `current`.
///
/// Different bytes count as a change only when the upstream modification
/// time differs too; re-encoded thumbnails with an identical timestamp are
/// ignored.
pub fn compare_picture(previous: Option<&ImageBlob>, current: Option<&ImageBlob>) -> PictureChange {
    match (previous, current) {
        (None, None) => PictureChange::Unchanged,
        (None, Some(_)) => PictureChange::Added,
        (Some(_), None) => PictureChange::Removed,
        (Some(old), Some(new)) => {
            if old.bytes == new.bytes || same_timestamp(old.last_modified, new.last_modified) {
                PictureChange::Unchanged
            } else {
                PictureChange::Changed
            }
        }
    }
}

/// Missing timestamps never compare equal.
fn same_timestamp(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Event for an accepted picture transition; values carry the upstream
/// modification times.
pub fn picture_event(
    subject: &str,
    previous: Option<&ImageBlob>,
    current: Option<&ImageBlob>,
) -> ChangeEvent {
    let describe = |blob: Option<&ImageBlob>| {
        blob.map(|b| {
            b.last_modified
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| format!("{} bytes", b.bytes.len()))
        })
    };
    ChangeEvent::value(
        EntityKind::ProfilePicture,
        subject,
        describe(previous),
        describe(current),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn blob(bytes: &[u8], ts: Option<i64>) -> ImageBlob {
        ImageBlob {
            bytes: bytes.to_vec(),
            last_modified: ts.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[rstest]
    #[case(None, None, PictureChange::Unchanged)]
    #[case(None, Some(blob(b"a", Some(1))), PictureChange::Added)]
    #[case(Some(blob(b"a", Some(1))), None, PictureChange::Removed)]
    #[case(Some(blob(b"a", Some(1))), Some(blob(b"a", Some(2))), PictureChange::Unchanged)]
    #[case(Some(blob(b"a", Some(1))), Some(blob(b"b", Some(1))), PictureChange::Unchanged)]
    #[case(Some(blob(b"a", Some(1))), Some(blob(b"b", Some(2))), PictureChange::Changed)]
    #[case(Some(blob(b"a", None)), Some(blob(b"b", None)), PictureChange::Changed)]
    fn test_compare_picture(
        #[case] previous: Option<ImageBlob>,
        #[case] current: Option<ImageBlob>,
        #[case] expected: PictureChange,
    ) {
        assert_eq!(compare_picture(previous.as_ref(), current.as_ref()), expected);
    }

    #[test]
    fn test_removed_event_has_no_new_value() {
        let old = blob(b"a", Some(1_700_000_000));
        let event = picture_event("u", Some(&old), None);
        assert_eq!(event.entity, EntityKind::ProfilePicture);
        assert_eq!(event.old_value.as_deref(), Some("2023-11-14T22:13:20+00:00"));
        assert_eq!(event.new_value, None);
    }
}
