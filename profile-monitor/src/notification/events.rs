//! Notification events.
//!
//! Defines what the poll loop hands to sinks and their priority levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::BackendKind;
use crate::monitor::{ChangeEvent, EntityKind};

/// Priority level for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NotificationPriority {
    /// Low priority - informational only.
    Low,
    /// Normal priority - standard notifications.
    Normal,
    /// High priority - important events.
    High,
    /// Critical priority - requires immediate attention.
    Critical,
}

impl Default for NotificationPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Conditions the operator has to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorAlert {
    /// Token acquisition keeps failing for the active backend.
    CredentialFailure {
        backend: BackendKind,
        message: String,
        requires_manual_action: bool,
        timestamp: DateTime<Utc>,
    },
    /// The monitored profile returned 404.
    ProfileDisappeared {
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The monitored profile is reachable again.
    ProfileReappeared {
        user_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// Everything a sink can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationEvent {
    Change(ChangeEvent),
    Alert(OperatorAlert),
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Change(_) => "change",
            Self::Alert(OperatorAlert::CredentialFailure { .. }) => "credential_failure",
            Self::Alert(OperatorAlert::ProfileDisappeared { .. }) => "profile_disappeared",
            Self::Alert(OperatorAlert::ProfileReappeared { .. }) => "profile_reappeared",
        }
    }

    pub fn priority(&self) -> NotificationPriority {
        match self {
            Self::Change(event) => match event.entity {
                EntityKind::PlaylistLikes => NotificationPriority::Low,
                _ => NotificationPriority::Normal,
            },
            Self::Alert(OperatorAlert::CredentialFailure {
                requires_manual_action,
                ..
            }) => {
                if *requires_manual_action {
                    NotificationPriority::Critical
                } else {
                    NotificationPriority::High
                }
            }
            Self::Alert(OperatorAlert::ProfileDisappeared { .. }) => NotificationPriority::Critical,
            Self::Alert(OperatorAlert::ProfileReappeared { .. }) => NotificationPriority::High,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Change(event) => format!("{} changed for {}", event.entity, event.subject),
            Self::Alert(OperatorAlert::CredentialFailure { backend, .. }) => {
                format!("Token acquisition failing ({})", backend)
            }
            Self::Alert(OperatorAlert::ProfileDisappeared { user_id, .. }) => {
                format!("Profile {} is gone", user_id)
            }
            Self::Alert(OperatorAlert::ProfileReappeared { user_id, .. }) => {
                format!("Profile {} is back", user_id)
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Change(event) => event.description(),
            Self::Alert(OperatorAlert::CredentialFailure {
                message,
                requires_manual_action,
                ..
            }) => {
                if *requires_manual_action {
                    format!("{} (manual action required)", message)
                } else {
                    message.clone()
                }
            }
            Self::Alert(OperatorAlert::ProfileDisappeared { .. }) => {
                "Profile lookup returned 404; still polling".to_string()
            }
            Self::Alert(OperatorAlert::ProfileReappeared { .. }) => {
                "Profile lookup succeeded again".to_string()
            }
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Change(event) => event.timestamp,
            Self::Alert(OperatorAlert::CredentialFailure { timestamp, .. })
            | Self::Alert(OperatorAlert::ProfileDisappeared { timestamp, .. })
            | Self::Alert(OperatorAlert::ProfileReappeared { timestamp, .. }) => *timestamp,
        }
    }
}

impl From<ChangeEvent> for NotificationEvent {
    fn from(event: ChangeEvent) -> Self {
        Self::Change(event)
    }
}

impl From<OperatorAlert> for NotificationEvent {
    fn from(alert: OperatorAlert) -> Self {
        Self::Alert(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_alert_priority_depends_on_manual_action() {
        let alert = |manual| {
            NotificationEvent::from(OperatorAlert::CredentialFailure {
                backend: BackendKind::Cookie,
                message: "anonymous token".into(),
                requires_manual_action: manual,
                timestamp: Utc::now(),
            })
        };
        assert_eq!(alert(true).priority(), NotificationPriority::Critical);
        assert_eq!(alert(false).priority(), NotificationPriority::High);
        assert_eq!(alert(true).event_type(), "credential_failure");
        assert!(alert(true).description().ends_with("(manual action required)"));
    }

    #[test]
    fn test_change_priority() {
        let likes = ChangeEvent::value(EntityKind::PlaylistLikes, "p", Some("1".into()), Some("2".into()));
        let name = ChangeEvent::value(EntityKind::ProfileName, "u", None, Some("x".into()));
        assert_eq!(NotificationEvent::from(likes).priority(), NotificationPriority::Low);
        assert_eq!(NotificationEvent::from(name).priority(), NotificationPriority::Normal);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(NotificationPriority::Low < NotificationPriority::Normal);
        assert!(NotificationPriority::High < NotificationPriority::Critical);
    }
}
