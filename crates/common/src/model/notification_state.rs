use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::alert_state::ParseStateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStateKind {
    #[default]
    Unknown,
    Pending,
    Completed,
}

impl NotificationStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for NotificationStateKind {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Delivery progress for one (org, alert, notifier) triple.
///
/// `version` is bumped on every write and guards the transition to
/// `Pending`; `alert_rule_state_updated_version` records which alert state
/// change the last attempt belonged to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotificationState {
    pub id: i64,
    pub org_id: i64,
    pub alert_id: i64,
    pub notifier_id: i64,
    pub state: NotificationStateKind,
    pub version: i64,
    pub updated_at: Option<DateTime<Utc>>,
    pub alert_rule_state_updated_version: i64,
}

impl AlertNotificationState {
    pub fn new(id: i64, org_id: i64, alert_id: i64, notifier_id: i64) -> Self {
        Self {
            id,
            org_id,
            alert_id,
            notifier_id,
            state: NotificationStateKind::Unknown,
            version: 0,
            updated_at: None,
            alert_rule_state_updated_version: 0,
        }
    }
}
