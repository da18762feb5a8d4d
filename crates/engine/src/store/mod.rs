//! Persistence collaborators of the engine.
//!
//! Three narrow traits cover alert rules, annotations and notification
//! delivery state. [`MemoryStore`] backs single-node runs and tests,
//! [`PgStore`] backs clustered deployments where the notification-state
//! version check is what serialises delivery between replicas.

mod error;
mod memory;
pub mod migrator;
mod pool;
mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use pool::create_pool;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vigil_common::model::{AlertNotificationState, AlertState, Annotation};

use crate::alert::{NotifierRef, RuleDefinition};
use crate::notifier::NotifierSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct SetAlertStateCommand {
    pub alert_id: i64,
    pub org_id: i64,
    pub state: AlertState,
    pub error: Option<String>,
    pub eval_data: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Result of an accepted state write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateTransition {
    pub state: AlertState,
    pub state_changes: i64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetPendingCommand {
    pub id: i64,
    /// Version the caller read.
    pub version: i64,
    /// `state_changes` of the alert this delivery belongs to.
    pub alert_rule_state_updated_version: i64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetCompleteCommand {
    pub id: i64,
    pub version: i64,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn list_alerts(&self) -> Result<Vec<RuleDefinition>, StoreError>;

    async fn upsert_alert(&self, def: &RuleDefinition) -> Result<(), StoreError>;

    /// Rejects writes to a paused alert and writes that would not change the
    /// state. Accepted writes bump `state_changes`.
    async fn set_alert_state(
        &self,
        cmd: &SetAlertStateCommand,
    ) -> Result<StateTransition, StoreError>;

    /// Pausing sets `Paused`; resuming resets the alert to `Unknown`.
    async fn pause_alert(
        &self,
        org_id: i64,
        alert_id: i64,
        paused: bool,
        at: DateTime<Utc>,
    ) -> Result<AlertState, StoreError>;
}

#[async_trait]
pub trait AnnotationStore: Send + Sync {
    async fn save(&self, annotation: &Annotation) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Notifiers matching `refs` plus every default notifier of the org,
    /// ordered by id.
    async fn get_notifiers(
        &self,
        org_id: i64,
        refs: &[NotifierRef],
    ) -> Result<Vec<NotifierSettings>, StoreError>;

    async fn upsert_notifier(&self, settings: &NotifierSettings) -> Result<(), StoreError>;

    async fn get_or_create_notification_state(
        &self,
        org_id: i64,
        alert_id: i64,
        notifier_id: i64,
    ) -> Result<AlertNotificationState, StoreError>;

    /// Moves the state to `Pending` if the caller's version is current or
    /// the stored attempt belongs to an older alert state change. Returns
    /// the new version.
    async fn set_notification_state_to_pending(
        &self,
        cmd: &SetPendingCommand,
    ) -> Result<i64, StoreError>;

    /// Moves the state to `Completed` regardless of version. Returns the new
    /// version.
    async fn set_notification_state_to_complete(
        &self,
        cmd: &SetCompleteCommand,
    ) -> Result<i64, StoreError>;
}

pub(crate) fn matches_ref(settings: &NotifierSettings, refs: &[NotifierRef]) -> bool {
    refs.iter().any(|r| match r {
        NotifierRef::Id(id) => *id == settings.id,
        NotifierRef::Uid(uid) => !uid.is_empty() && *uid == settings.uid,
    })
}
