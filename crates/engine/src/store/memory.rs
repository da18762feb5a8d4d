use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use vigil_common::model::{AlertNotificationState, AlertState, Annotation, NotificationStateKind};

use super::{
    matches_ref, AlertStore, AnnotationStore, NotificationStore, SetAlertStateCommand,
    SetCompleteCommand, SetPendingCommand, StateTransition, StoreError,
};
use crate::alert::{NotifierRef, RuleDefinition};
use crate::notifier::NotifierSettings;

/// In-process store. Every compare-and-set runs while holding the dashmap
/// entry lock for the row it touches.
#[derive(Clone, Default)]
pub struct MemoryStore {
    alerts: Arc<DashMap<i64, RuleDefinition>>,
    annotations: Arc<DashMap<i64, Annotation>>,
    notifiers: Arc<DashMap<i64, NotifierSettings>>,
    states: Arc<DashMap<i64, AlertNotificationState>>,
    state_keys: Arc<DashMap<(i64, i64, i64), i64>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get_alert(&self, alert_id: i64) -> Option<RuleDefinition> {
        self.alerts.get(&alert_id).map(|a| a.clone())
    }

    /// Annotations written for one alert, oldest first.
    pub fn annotations_for(&self, alert_id: i64) -> Vec<Annotation> {
        let mut found: Vec<(i64, Annotation)> = self
            .annotations
            .iter()
            .filter(|a| a.value().alert_id == alert_id)
            .map(|a| (*a.key(), a.value().clone()))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found.into_iter().map(|(_, a)| a).collect()
    }

    pub fn notification_state(&self, id: i64) -> Option<AlertNotificationState> {
        self.states.get(&id).map(|s| s.clone())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn list_alerts(&self) -> Result<Vec<RuleDefinition>, StoreError> {
        let mut alerts: Vec<RuleDefinition> =
            self.alerts.iter().map(|a| a.value().clone()).collect();
        alerts.sort_by_key(|a| a.id);
        Ok(alerts)
    }

    async fn upsert_alert(&self, def: &RuleDefinition) -> Result<(), StoreError> {
        self.alerts.insert(def.id, def.clone());
        Ok(())
    }

    async fn set_alert_state(
        &self,
        cmd: &SetAlertStateCommand,
    ) -> Result<StateTransition, StoreError> {
        let mut alert = self
            .alerts
            .get_mut(&cmd.alert_id)
            .filter(|a| a.org_id == cmd.org_id)
            .ok_or(StoreError::NotFound {
                entity: "alert",
                id: cmd.alert_id,
            })?;

        if alert.state == AlertState::Paused {
            return Err(StoreError::CannotChangeStateOnPausedAlert {
                alert_id: cmd.alert_id,
            });
        }
        if alert.state == cmd.state {
            return Err(StoreError::RequiresNewState {
                alert_id: cmd.alert_id,
                state: cmd.state,
            });
        }

        alert.state = cmd.state;
        alert.state_changes += 1;
        alert.last_state_change = Some(cmd.at);
        alert.execution_error = cmd.error.clone();
        alert.eval_data = cmd.eval_data.clone();

        Ok(StateTransition {
            state: alert.state,
            state_changes: alert.state_changes,
            at: cmd.at,
        })
    }

    async fn pause_alert(
        &self,
        org_id: i64,
        alert_id: i64,
        paused: bool,
        at: DateTime<Utc>,
    ) -> Result<AlertState, StoreError> {
        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .filter(|a| a.org_id == org_id)
            .ok_or(StoreError::NotFound {
                entity: "alert",
                id: alert_id,
            })?;
        alert.state = if paused {
            AlertState::Paused
        } else {
            AlertState::Unknown
        };
        alert.last_state_change = Some(at);
        Ok(alert.state)
    }
}

#[async_trait]
impl AnnotationStore for MemoryStore {
    async fn save(&self, annotation: &Annotation) -> Result<i64, StoreError> {
        let id = self.next_id();
        self.annotations.insert(id, annotation.clone());
        Ok(id)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn get_notifiers(
        &self,
        org_id: i64,
        refs: &[NotifierRef],
    ) -> Result<Vec<NotifierSettings>, StoreError> {
        let mut found: Vec<NotifierSettings> = self
            .notifiers
            .iter()
            .filter(|n| n.org_id == org_id && (n.is_default || matches_ref(n.value(), refs)))
            .map(|n| n.value().clone())
            .collect();
        found.sort_by_key(|n| n.id);
        Ok(found)
    }

    async fn upsert_notifier(&self, settings: &NotifierSettings) -> Result<(), StoreError> {
        self.notifiers.insert(settings.id, settings.clone());
        Ok(())
    }

    async fn get_or_create_notification_state(
        &self,
        org_id: i64,
        alert_id: i64,
        notifier_id: i64,
    ) -> Result<AlertNotificationState, StoreError> {
        let id = *self
            .state_keys
            .entry((org_id, alert_id, notifier_id))
            .or_insert_with(|| {
                let id = self.next_id();
                self.states.insert(
                    id,
                    AlertNotificationState::new(id, org_id, alert_id, notifier_id),
                );
                id
            });
        self.notification_state(id).ok_or(StoreError::NotFound {
            entity: "alert notification state",
            id,
        })
    }

    async fn set_notification_state_to_pending(
        &self,
        cmd: &SetPendingCommand,
    ) -> Result<i64, StoreError> {
        let mut state = self.states.get_mut(&cmd.id).ok_or(StoreError::NotFound {
            entity: "alert notification state",
            id: cmd.id,
        })?;

        let current = state.version == cmd.version;
        let superseded =
            state.alert_rule_state_updated_version < cmd.alert_rule_state_updated_version;
        if !current && !superseded {
            return Err(StoreError::AlertNotificationStateVersionConflict { id: cmd.id });
        }

        state.state = NotificationStateKind::Pending;
        state.version += 1;
        state.updated_at = Some(cmd.at);
        state.alert_rule_state_updated_version = cmd.alert_rule_state_updated_version;
        Ok(state.version)
    }

    async fn set_notification_state_to_complete(
        &self,
        cmd: &SetCompleteCommand,
    ) -> Result<i64, StoreError> {
        let mut state = self.states.get_mut(&cmd.id).ok_or(StoreError::NotFound {
            entity: "alert notification state",
            id: cmd.id,
        })?;
        state.state = NotificationStateKind::Completed;
        state.version += 1;
        state.updated_at = Some(cmd.at);
        Ok(state.version)
    }
}
