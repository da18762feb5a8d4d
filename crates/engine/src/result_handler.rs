//! Turns a finished evaluation into a persisted state change.
//!
//! Notifications only fire on transition edges: a rule whose state did not
//! change never reaches [`NotificationService::notify`]. Reminder-enabled
//! notifiers get a separate [`NotificationService::remind`] check instead.

use std::sync::Arc;

use vigil_common::clock::Clock;
use vigil_common::model::{AlertState, Annotation};

use crate::alert::EvalContext;
use crate::metrics::EngineMetrics;
use crate::notifier::{DispatchSummary, NotificationService};
use crate::store::{AlertStore, AnnotationStore, SetAlertStateCommand, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    TestRun,
    Unchanged {
        state: AlertState,
        reminders: DispatchSummary,
    },
    Transitioned {
        from: AlertState,
        to: AlertState,
        notified: DispatchSummary,
    },
}

pub struct ResultHandler {
    alerts: Arc<dyn AlertStore>,
    annotations: Arc<dyn AnnotationStore>,
    notifications: Arc<NotificationService>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
}

impl ResultHandler {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        annotations: Arc<dyn AnnotationStore>,
        notifications: Arc<NotificationService>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            alerts,
            annotations,
            notifications,
            clock,
            metrics,
        }
    }

    /// Applies the evaluation outcome. On return `ctx.rule` carries the new
    /// state and, after a persisted transition, the store's `state_changes`.
    pub async fn handle(&self, ctx: &mut EvalContext) -> Result<HandleOutcome, StoreError> {
        let now = self.clock.now();
        let old = ctx.prev_state;
        let new = ctx.new_state(now);
        ctx.rule.state = new;

        if ctx.is_test_run {
            return Ok(HandleOutcome::TestRun);
        }

        let rule_id = ctx.rule.id;
        if new == old {
            let reminders = match self.notifications.remind(ctx).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(rule_id, error = %e, "reminder check failed");
                    DispatchSummary::default()
                }
            };
            return Ok(HandleOutcome::Unchanged {
                state: new,
                reminders,
            });
        }

        let cmd = SetAlertStateCommand {
            alert_id: rule_id,
            org_id: ctx.rule.org_id,
            state: new,
            error: ctx.error.as_ref().map(|e| e.to_string()),
            eval_data: ctx.eval_data(),
            at: now,
        };
        let transition = match self.alerts.set_alert_state(&cmd).await {
            Ok(t) => t,
            Err(StoreError::RequiresNewState { .. }) => {
                tracing::debug!(rule_id, state = %new, "state already persisted");
                return Ok(HandleOutcome::Unchanged {
                    state: new,
                    reminders: DispatchSummary::default(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    rule_id,
                    from = %old,
                    to = %new,
                    error = %e,
                    "failed to save alert state"
                );
                return Err(e);
            }
        };

        ctx.rule.state_changes = transition.state_changes;
        ctx.rule.last_state_change = transition.at;
        self.metrics.inc_state_transitions();
        tracing::info!(
            rule_id,
            from = %old,
            to = %new,
            state_changes = transition.state_changes,
            "alert state changed"
        );

        let annotation = Annotation {
            org_id: ctx.rule.org_id,
            alert_id: rule_id,
            dashboard_id: ctx.rule.dashboard_id,
            panel_id: ctx.rule.panel_id,
            title: ctx.notification_title(),
            text: annotation_text(ctx),
            new_state: new,
            prev_state: old,
            timestamp: now,
            data: cmd.eval_data,
        };
        if let Err(e) = self.annotations.save(&annotation).await {
            tracing::warn!(rule_id, error = %e, "failed to save annotation");
        }

        let notified = match self.notifications.notify(ctx).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(rule_id, error = %e, "failed to dispatch notifications");
                DispatchSummary::default()
            }
        };

        Ok(HandleOutcome::Transitioned {
            from: old,
            to: new,
            notified,
        })
    }
}

fn annotation_text(ctx: &EvalContext) -> String {
    match &ctx.error {
        Some(e) => format!("Error: {e}"),
        None if ctx.condition_evals.is_empty() => ctx.rule.message.clone(),
        None => ctx.condition_evals.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::{epoch, rule_with, static_condition};
    use crate::alert::{EvalError, RuleDefinition};
    use crate::notifier::testing::{recording_registry, RecordingNotifier};
    use crate::notifier::NotifierSettings;
    use crate::store::{MemoryStore, NotificationStore};
    use std::time::Duration;
    use vigil_common::clock::MockClock;

    struct Fixture {
        store: MemoryStore,
        recorder: Arc<RecordingNotifier>,
        metrics: Arc<EngineMetrics>,
        handler: ResultHandler,
    }

    async fn fixture(stored_state: AlertState) -> Fixture {
        let store = MemoryStore::new();
        let def: RuleDefinition = serde_json::from_value(serde_json::json!({
            "id": 1,
            "org_id": 1,
            "name": "test rule",
            "frequency_seconds": 10,
            "state": stored_state,
            "conditions": [{"type": "static"}],
            "notifications": [1],
        }))
        .unwrap();
        store.upsert_alert(&def).await.unwrap();
        store
            .upsert_notifier(&NotifierSettings {
                id: 1,
                uid: "ops".into(),
                org_id: 1,
                name: "ops".into(),
                kind: "recording".into(),
                is_default: false,
                send_reminder: false,
                frequency_seconds: 0,
                disable_resolve_message: false,
                settings: serde_json::Value::Null,
            })
            .await
            .unwrap();

        let recorder = RecordingNotifier::new();
        let metrics = EngineMetrics::new();
        let clock: Arc<dyn Clock> = Arc::new(MockClock::from_epoch_seconds(1_000));
        let notifications = Arc::new(NotificationService::new(
            Arc::new(store.clone()),
            Arc::new(recording_registry(recorder.clone())),
            clock.clone(),
            metrics.clone(),
            Duration::from_secs(5),
        ));
        let handler = ResultHandler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            notifications,
            clock,
            metrics.clone(),
        );
        Fixture {
            store,
            recorder,
            metrics,
            handler,
        }
    }

    fn context(state: AlertState, firing: bool) -> EvalContext {
        let mut rule = rule_with(vec![static_condition(firing)]);
        rule.state = state;
        let mut ctx = EvalContext::new(rule, epoch(999));
        ctx.firing = firing;
        ctx.condition_evals = format!("[0: {firing}] = {firing}");
        ctx
    }

    #[tokio::test]
    async fn transition_persists_annotates_and_notifies() {
        let f = fixture(AlertState::Ok).await;
        let mut ctx = context(AlertState::Ok, true);

        let outcome = f.handler.handle(&mut ctx).await.unwrap();
        match outcome {
            HandleOutcome::Transitioned { from, to, notified } => {
                assert_eq!(from, AlertState::Ok);
                assert_eq!(to, AlertState::Alerting);
                assert_eq!(notified.sent, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(ctx.rule.state, AlertState::Alerting);
        assert_eq!(ctx.rule.state_changes, 1);
        assert_eq!(f.store.get_alert(1).unwrap().state, AlertState::Alerting);
        assert_eq!(f.recorder.sent().len(), 1);
        assert_eq!(f.metrics.state_transitions_val(), 1);

        let annotations = f.store.annotations_for(1);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].prev_state, AlertState::Ok);
        assert_eq!(annotations[0].new_state, AlertState::Alerting);
        assert_eq!(annotations[0].title, "[Alerting] test rule");
        assert_eq!(annotations[0].text, "[0: true] = true");
    }

    #[tokio::test]
    async fn unchanged_state_never_notifies() {
        let f = fixture(AlertState::Alerting).await;
        for _ in 0..3 {
            let mut ctx = context(AlertState::Alerting, true);
            let outcome = f.handler.handle(&mut ctx).await.unwrap();
            assert!(matches!(
                outcome,
                HandleOutcome::Unchanged {
                    state: AlertState::Alerting,
                    ..
                }
            ));
        }

        assert!(f.recorder.sent().is_empty());
        assert!(f.store.annotations_for(1).is_empty());
        assert_eq!(f.store.get_alert(1).unwrap().state_changes, 0);
        let state = f.store.get_or_create_notification_state(1, 1, 1).await.unwrap();
        assert_eq!(state.version, 0);
    }

    #[tokio::test]
    async fn paused_alert_is_rejected() {
        let f = fixture(AlertState::Paused).await;
        let mut ctx = context(AlertState::Ok, true);

        let err = f.handler.handle(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StoreError::CannotChangeStateOnPausedAlert { alert_id: 1 }));
        assert_eq!(f.store.get_alert(1).unwrap().state, AlertState::Paused);
        assert!(f.recorder.sent().is_empty());
        assert!(f.store.annotations_for(1).is_empty());
    }

    #[tokio::test]
    async fn test_runs_are_not_persisted() {
        let f = fixture(AlertState::Ok).await;
        let mut ctx = context(AlertState::Ok, true);
        ctx.is_test_run = true;

        assert_eq!(f.handler.handle(&mut ctx).await.unwrap(), HandleOutcome::TestRun);
        assert_eq!(ctx.rule.state, AlertState::Alerting);
        assert_eq!(f.store.get_alert(1).unwrap().state, AlertState::Ok);
        assert!(f.recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn evaluation_error_moves_to_pending() {
        let f = fixture(AlertState::Ok).await;
        let mut ctx = context(AlertState::Ok, false);
        ctx.error = Some(EvalError::Query("datasource down".into()));

        let outcome = f.handler.handle(&mut ctx).await.unwrap();
        assert!(matches!(
            outcome,
            HandleOutcome::Transitioned { to: AlertState::Pending, .. }
        ));

        let stored = f.store.get_alert(1).unwrap();
        assert_eq!(stored.state, AlertState::Pending);
        assert_eq!(stored.execution_error.as_deref(), Some("query failed: datasource down"));
        assert!(stored.eval_data["error"].is_string());
        // OK -> Pending is not worth a notification.
        assert!(f.recorder.sent().is_empty());
        assert_eq!(f.store.annotations_for(1)[0].text, "Error: query failed: datasource down");
    }

    #[tokio::test]
    async fn already_persisted_state_is_not_notified() {
        let f = fixture(AlertState::Alerting).await;
        let mut ctx = context(AlertState::Ok, true);

        let outcome = f.handler.handle(&mut ctx).await.unwrap();
        assert!(matches!(outcome, HandleOutcome::Unchanged { .. }));
        assert!(f.recorder.sent().is_empty());
    }
}
