use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;

use vigil_common::model::{AlertNotificationState, AlertState, Annotation, NotificationStateKind};

use super::{
    AlertStore, AnnotationStore, NotificationStore, SetAlertStateCommand, SetCompleteCommand,
    SetPendingCommand, StateTransition, StoreError,
};
use crate::alert::{NotifierRef, RuleDefinition};
use crate::notifier::NotifierSettings;

/// Postgres-backed store shared by every engine replica.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_text<T: Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StoreError::Decode(format!("expected a string, got {other}"))),
    }
}

fn from_text<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::String(text.to_string()))?)
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    id: i64,
    org_id: i64,
    dashboard_id: i64,
    panel_id: i64,
    name: String,
    message: String,
    frequency_seconds: i64,
    for_seconds: i64,
    state: String,
    severity: String,
    state_changes: i64,
    new_state_date: Option<DateTime<Utc>>,
    no_data_state: String,
    execution_error_state: String,
    conditions: serde_json::Value,
    notifications: serde_json::Value,
    execution_error: Option<String>,
    eval_data: serde_json::Value,
}

impl AlertRow {
    fn into_definition(self) -> Result<RuleDefinition, StoreError> {
        Ok(RuleDefinition {
            id: self.id,
            org_id: self.org_id,
            dashboard_id: self.dashboard_id,
            panel_id: self.panel_id,
            name: self.name,
            message: self.message,
            frequency_seconds: self.frequency_seconds,
            for_seconds: self.for_seconds,
            state: from_text(&self.state)?,
            severity: from_text(&self.severity)?,
            state_changes: self.state_changes,
            last_state_change: self.new_state_date,
            no_data_state: from_text(&self.no_data_state)?,
            execution_error_state: from_text(&self.execution_error_state)?,
            conditions: serde_json::from_value(self.conditions)?,
            notifications: serde_json::from_value(self.notifications)?,
            execution_error: self.execution_error,
            eval_data: self.eval_data,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotifierRow {
    id: i64,
    uid: String,
    org_id: i64,
    name: String,
    kind: String,
    is_default: bool,
    send_reminder: bool,
    frequency_seconds: i64,
    disable_resolve_message: bool,
    settings: serde_json::Value,
}

impl From<NotifierRow> for NotifierSettings {
    fn from(row: NotifierRow) -> Self {
        Self {
            id: row.id,
            uid: row.uid,
            org_id: row.org_id,
            name: row.name,
            kind: row.kind,
            is_default: row.is_default,
            send_reminder: row.send_reminder,
            frequency_seconds: row.frequency_seconds,
            disable_resolve_message: row.disable_resolve_message,
            settings: row.settings,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationStateRow {
    id: i64,
    org_id: i64,
    alert_id: i64,
    notifier_id: i64,
    state: String,
    version: i64,
    updated_at: Option<DateTime<Utc>>,
    alert_rule_state_updated_version: i64,
}

impl TryFrom<NotificationStateRow> for AlertNotificationState {
    type Error = StoreError;

    fn try_from(row: NotificationStateRow) -> Result<Self, Self::Error> {
        let state = row.state.parse::<NotificationStateKind>().map_err(|e| {
            StoreError::Decode(format!("alert notification state {}: {e}", row.id))
        })?;
        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            alert_id: row.alert_id,
            notifier_id: row.notifier_id,
            state,
            version: row.version,
            updated_at: row.updated_at,
            alert_rule_state_updated_version: row.alert_rule_state_updated_version,
        })
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn list_alerts(&self) -> Result<Vec<RuleDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT id, org_id, dashboard_id, panel_id, name, message, frequency_seconds, \
             for_seconds, state, severity, state_changes, new_state_date, no_data_state, \
             execution_error_state, conditions, notifications, execution_error, eval_data \
             FROM alert_rule ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AlertRow::into_definition).collect()
    }

    async fn upsert_alert(&self, def: &RuleDefinition) -> Result<(), StoreError> {
        let conditions = serde_json::to_value(&def.conditions)?;
        let notifications = serde_json::to_value(&def.notifications)?;
        sqlx::query(
            r#"INSERT INTO alert_rule
               (id, org_id, dashboard_id, panel_id, name, message, frequency_seconds,
                for_seconds, state, severity, state_changes, new_state_date, no_data_state,
                execution_error_state, conditions, notifications, execution_error, eval_data)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                       $10, $11, $12, $13, $14, $15, $16, $17, $18)
               ON CONFLICT (id) DO UPDATE SET
                 org_id = EXCLUDED.org_id,
                 dashboard_id = EXCLUDED.dashboard_id,
                 panel_id = EXCLUDED.panel_id,
                 name = EXCLUDED.name,
                 message = EXCLUDED.message,
                 frequency_seconds = EXCLUDED.frequency_seconds,
                 for_seconds = EXCLUDED.for_seconds,
                 severity = EXCLUDED.severity,
                 no_data_state = EXCLUDED.no_data_state,
                 execution_error_state = EXCLUDED.execution_error_state,
                 conditions = EXCLUDED.conditions,
                 notifications = EXCLUDED.notifications"#,
        )
        .bind(def.id)
        .bind(def.org_id)
        .bind(def.dashboard_id)
        .bind(def.panel_id)
        .bind(&def.name)
        .bind(&def.message)
        .bind(def.frequency_seconds)
        .bind(def.for_seconds)
        .bind(def.state.as_str())
        .bind(def.severity.as_str())
        .bind(def.state_changes)
        .bind(def.last_state_change)
        .bind(to_text(&def.no_data_state)?)
        .bind(to_text(&def.execution_error_state)?)
        .bind(&conditions)
        .bind(&notifications)
        .bind(&def.execution_error)
        .bind(&def.eval_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_alert_state(
        &self,
        cmd: &SetAlertStateCommand,
    ) -> Result<StateTransition, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT state FROM alert_rule WHERE id = $1 AND org_id = $2 FOR UPDATE",
        )
        .bind(cmd.alert_id)
        .bind(cmd.org_id)
        .fetch_optional(&mut *tx)
        .await?;

        let current: AlertState = match current {
            Some(s) => from_text(&s)?,
            None => {
                return Err(StoreError::NotFound {
                    entity: "alert",
                    id: cmd.alert_id,
                })
            }
        };
        if current == AlertState::Paused {
            return Err(StoreError::CannotChangeStateOnPausedAlert {
                alert_id: cmd.alert_id,
            });
        }
        if current == cmd.state {
            return Err(StoreError::RequiresNewState {
                alert_id: cmd.alert_id,
                state: cmd.state,
            });
        }

        let state_changes: i64 = sqlx::query_scalar(
            r#"UPDATE alert_rule
               SET state = $2, new_state_date = $3, state_changes = state_changes + 1,
                   execution_error = $4, eval_data = $5
               WHERE id = $1
               RETURNING state_changes"#,
        )
        .bind(cmd.alert_id)
        .bind(cmd.state.as_str())
        .bind(cmd.at)
        .bind(&cmd.error)
        .bind(&cmd.eval_data)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(StateTransition {
            state: cmd.state,
            state_changes,
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
        let state = if paused {
            AlertState::Paused
        } else {
            AlertState::Unknown
        };
        let result = sqlx::query(
            "UPDATE alert_rule SET state = $3, new_state_date = $4 WHERE id = $1 AND org_id = $2",
        )
        .bind(alert_id)
        .bind(org_id)
        .bind(state.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "alert",
                id: alert_id,
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl AnnotationStore for PgStore {
    async fn save(&self, annotation: &Annotation) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO annotation
               (org_id, alert_id, dashboard_id, panel_id, title, text, new_state, prev_state,
                epoch, data)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING id"#,
        )
        .bind(annotation.org_id)
        .bind(annotation.alert_id)
        .bind(annotation.dashboard_id)
        .bind(annotation.panel_id)
        .bind(&annotation.title)
        .bind(&annotation.text)
        .bind(annotation.new_state.as_str())
        .bind(annotation.prev_state.as_str())
        .bind(annotation.timestamp)
        .bind(&annotation.data)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn get_notifiers(
        &self,
        org_id: i64,
        refs: &[NotifierRef],
    ) -> Result<Vec<NotifierSettings>, StoreError> {
        let mut ids = Vec::new();
        let mut uids = Vec::new();
        for r in refs {
            match r {
                NotifierRef::Id(id) => ids.push(*id),
                NotifierRef::Uid(uid) => uids.push(uid.clone()),
            }
        }

        let rows = sqlx::query_as::<_, NotifierRow>(
            "SELECT id, uid, org_id, name, kind, is_default, send_reminder, frequency_seconds, \
             disable_resolve_message, settings FROM alert_notification \
             WHERE org_id = $1 AND (is_default OR id = ANY($2) OR uid = ANY($3)) \
             ORDER BY id",
        )
        .bind(org_id)
        .bind(&ids)
        .bind(&uids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(NotifierSettings::from).collect())
    }

    async fn upsert_notifier(&self, settings: &NotifierSettings) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO alert_notification
               (id, uid, org_id, name, kind, is_default, send_reminder, frequency_seconds,
                disable_resolve_message, settings)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (id) DO UPDATE SET
                 uid = EXCLUDED.uid,
                 org_id = EXCLUDED.org_id,
                 name = EXCLUDED.name,
                 kind = EXCLUDED.kind,
                 is_default = EXCLUDED.is_default,
                 send_reminder = EXCLUDED.send_reminder,
                 frequency_seconds = EXCLUDED.frequency_seconds,
                 disable_resolve_message = EXCLUDED.disable_resolve_message,
                 settings = EXCLUDED.settings"#,
        )
        .bind(settings.id)
        .bind(&settings.uid)
        .bind(settings.org_id)
        .bind(&settings.name)
        .bind(&settings.kind)
        .bind(settings.is_default)
        .bind(settings.send_reminder)
        .bind(settings.frequency_seconds)
        .bind(settings.disable_resolve_message)
        .bind(&settings.settings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_or_create_notification_state(
        &self,
        org_id: i64,
        alert_id: i64,
        notifier_id: i64,
    ) -> Result<AlertNotificationState, StoreError> {
        sqlx::query(
            r#"INSERT INTO alert_notification_state
               (org_id, alert_id, notifier_id, state, version, alert_rule_state_updated_version)
               VALUES ($1, $2, $3, 'unknown', 0, 0)
               ON CONFLICT (org_id, alert_id, notifier_id) DO NOTHING"#,
        )
        .bind(org_id)
        .bind(alert_id)
        .bind(notifier_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, NotificationStateRow>(
            "SELECT id, org_id, alert_id, notifier_id, state, version, updated_at, \
             alert_rule_state_updated_version FROM alert_notification_state \
             WHERE org_id = $1 AND alert_id = $2 AND notifier_id = $3",
        )
        .bind(org_id)
        .bind(alert_id)
        .bind(notifier_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn set_notification_state_to_pending(
        &self,
        cmd: &SetPendingCommand,
    ) -> Result<i64, StoreError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"UPDATE alert_notification_state
               SET state = 'pending', version = version + 1, updated_at = $4,
                   alert_rule_state_updated_version = $3
               WHERE id = $1 AND (version = $2 OR alert_rule_state_updated_version < $3)
               RETURNING version"#,
        )
        .bind(cmd.id)
        .bind(cmd.version)
        .bind(cmd.alert_rule_state_updated_version)
        .bind(cmd.at)
        .fetch_optional(&self.pool)
        .await?;
        version.ok_or(StoreError::AlertNotificationStateVersionConflict { id: cmd.id })
    }

    async fn set_notification_state_to_complete(
        &self,
        cmd: &SetCompleteCommand,
    ) -> Result<i64, StoreError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"UPDATE alert_notification_state
               SET state = 'completed', version = version + 1, updated_at = $2
               WHERE id = $1
               RETURNING version"#,
        )
        .bind(cmd.id)
        .bind(cmd.at)
        .fetch_optional(&self.pool)
        .await?;
        version.ok_or(StoreError::NotFound {
            entity: "alert notification state",
            id: cmd.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state: &str) -> NotificationStateRow {
        NotificationStateRow {
            id: 9,
            org_id: 1,
            alert_id: 2,
            notifier_id: 3,
            state: state.to_string(),
            version: 4,
            updated_at: None,
            alert_rule_state_updated_version: 1,
        }
    }

    #[test]
    fn stored_notification_state_decodes() {
        let state = AlertNotificationState::try_from(row("pending")).unwrap();
        assert_eq!(state.state, NotificationStateKind::Pending);
        assert_eq!(state.version, 4);
    }

    #[test]
    fn unrecognised_notification_state_is_decode_error() {
        let err = AlertNotificationState::try_from(row("delivered")).unwrap_err();
        assert!(matches!(err, StoreError::Decode(ref m) if m.contains("delivered")));
        assert!(err.to_string().contains("alert notification state 9"));
    }
}
