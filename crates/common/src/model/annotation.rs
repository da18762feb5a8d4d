use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AlertState;

/// Audit record written on every alert state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub org_id: i64,
    pub alert_id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub title: String,
    pub text: String,
    pub new_state: AlertState,
    pub prev_state: AlertState,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}
