use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use vigil_common::model::AlertState;

use super::channel::{Notification, Notifier, NotifyError};
use super::settings::NotifierSettings;
use crate::alert::Severity;

#[derive(Debug, Deserialize)]
struct SlackSettings {
    url: String,
}

/// Posts to a Slack incoming webhook.
pub struct SlackNotifier {
    name: String,
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    pub fn new(name: String, webhook_url: String, client: Client) -> Self {
        Self {
            name,
            webhook_url,
            client,
        }
    }

    pub fn from_settings(settings: &NotifierSettings, client: Client) -> Result<Self, NotifyError> {
        let parsed: SlackSettings = serde_json::from_value(settings.settings.clone())
            .map_err(|e| NotifyError(format!("slack {}: {e}", settings.name)))?;
        Ok(Self::new(settings.name.clone(), parsed.url, client))
    }
}

fn payload(n: &Notification) -> serde_json::Value {
    let color = match (n.state, n.severity) {
        (AlertState::Ok, _) => "#36a64f",
        (AlertState::Alerting, Severity::Critical) => "#d32f2f",
        (AlertState::Alerting, _) => "#f2c744",
        _ => "#888888",
    };
    let status_emoji = match n.state {
        AlertState::Alerting => ":fire:",
        AlertState::Ok => ":white_check_mark:",
        AlertState::NoData => ":grey_question:",
        _ => ":hourglass:",
    };

    let mut fields: Vec<serde_json::Value> = n
        .matches
        .iter()
        .map(|m| {
            let value = m
                .value
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "null".into());
            serde_json::json!({ "title": &m.metric, "value": value, "short": true })
        })
        .collect();
    if let Some(e) = &n.error {
        fields.push(serde_json::json!({ "title": "Error", "value": e, "short": false }));
    }

    serde_json::json!({
        "attachments": [{
            "color": color,
            "title": format!("{status_emoji} {}", n.title),
            "text": &n.message,
            "fields": fields,
            "ts": n.timestamp.timestamp(),
        }]
    })
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.client
            .post(&self.webhook_url)
            .json(&payload(notification))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
