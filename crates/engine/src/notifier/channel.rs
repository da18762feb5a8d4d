use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use vigil_common::model::AlertState;

use crate::alert::{EvalContext, EvalMatch, Severity};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    /// A failed send is reported, never retried here. The next reminder or
    /// state change is the retry.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("notify: {0}")]
pub struct NotifyError(pub String);

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Payload handed to every notifier for one alert state.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub rule_id: i64,
    pub org_id: i64,
    pub rule_name: String,
    pub title: String,
    pub message: String,
    pub state: AlertState,
    pub prev_state: AlertState,
    pub severity: Severity,
    pub matches: Vec<EvalMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn from_context(ctx: &EvalContext, timestamp: DateTime<Utc>) -> Self {
        Self {
            rule_id: ctx.rule.id,
            org_id: ctx.rule.org_id,
            rule_name: ctx.rule.name.clone(),
            title: ctx.notification_title(),
            message: ctx.rule.message.clone(),
            state: ctx.rule.state,
            prev_state: ctx.prev_state,
            severity: ctx.rule.severity,
            matches: ctx.matches.clone(),
            error: ctx.error.as_ref().map(|e| e.to_string()),
            timestamp,
        }
    }

    pub fn is_resolve(&self) -> bool {
        self.state == AlertState::Ok
    }
}
