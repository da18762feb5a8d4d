use serde::{Deserialize, Serialize};

fn default_org() -> i64 {
    1
}

/// One configured notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierSettings {
    pub id: i64,
    #[serde(default)]
    pub uid: String,
    #[serde(default = "default_org")]
    pub org_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Attached to every alert of the org, whether referenced or not.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub send_reminder: bool,
    /// Reminder interval in seconds.
    #[serde(default)]
    pub frequency_seconds: i64,
    #[serde(default)]
    pub disable_resolve_message: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl NotifierSettings {
    pub fn reminder_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.frequency_seconds.max(0))
    }
}
