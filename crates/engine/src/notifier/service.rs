use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use vigil_common::clock::Clock;

use super::channel::Notification;
use super::policy::should_notify;
use super::registry::NotifierRegistry;
use super::settings::NotifierSettings;
use crate::alert::EvalContext;
use crate::metrics::EngineMetrics;
use crate::store::{NotificationStore, SetCompleteCommand, SetPendingCommand, StoreError};

/// Outcome of one dispatch for a single alert.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflicts: usize,
}

enum Outcome {
    Sent,
    Failed,
    Skipped,
    Conflict,
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    registry: Arc<NotifierRegistry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    timeout: Duration,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: Arc<NotifierRegistry>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            metrics,
            timeout,
        }
    }

    /// Delivers a state transition to every notifier bound to the rule and
    /// every default notifier of its org.
    pub async fn notify(&self, ctx: &EvalContext) -> Result<DispatchSummary, StoreError> {
        self.dispatch(ctx, false).await
    }

    /// Re-checks reminder-enabled notifiers for a rule whose state did not
    /// change. Other notifiers are never consulted.
    pub async fn remind(&self, ctx: &EvalContext) -> Result<DispatchSummary, StoreError> {
        self.dispatch(ctx, true).await
    }

    async fn dispatch(
        &self,
        ctx: &EvalContext,
        reminders_only: bool,
    ) -> Result<DispatchSummary, StoreError> {
        let notifiers = self
            .store
            .get_notifiers(ctx.rule.org_id, &ctx.rule.notifications)
            .await?;

        let now = self.clock.now();
        let notification = Notification::from_context(ctx, now);

        let outcomes = join_all(
            notifiers
                .iter()
                .filter(|n| !reminders_only || n.send_reminder)
                .map(|n| self.deliver(ctx, n, &notification, now)),
        )
        .await;

        let mut summary = DispatchSummary::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Sent => summary.sent += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Conflict => summary.conflicts += 1,
            }
        }
        Ok(summary)
    }

    async fn deliver(
        &self,
        ctx: &EvalContext,
        settings: &NotifierSettings,
        notification: &Notification,
        now: DateTime<Utc>,
    ) -> Outcome {
        let rule_id = ctx.rule.id;
        let notifier_name = settings.name.as_str();

        let state = match self
            .store
            .get_or_create_notification_state(ctx.rule.org_id, rule_id, settings.id)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    rule_id,
                    notifier = notifier_name,
                    error = %e,
                    "failed to load notification state"
                );
                return Outcome::Failed;
            }
        };

        if !should_notify(ctx.prev_state, ctx.rule.state, settings, &state, now) {
            tracing::debug!(rule_id, notifier = notifier_name, "notification not needed");
            return Outcome::Skipped;
        }

        let notifier = match self.registry.build(settings) {
            Ok(n) => n,
            Err(e) => {
                self.metrics.inc_notifications_failed();
                tracing::warn!(
                    rule_id,
                    notifier = notifier_name,
                    error = %e,
                    "cannot build notifier"
                );
                return Outcome::Failed;
            }
        };

        let pending = SetPendingCommand {
            id: state.id,
            version: state.version,
            alert_rule_state_updated_version: ctx.rule.state_changes,
            at: now,
        };
        let pending_version = match self
            .store
            .set_notification_state_to_pending(&pending)
            .await
        {
            Ok(v) => v,
            Err(StoreError::AlertNotificationStateVersionConflict { .. }) => {
                self.metrics.inc_notification_version_conflicts();
                tracing::warn!(
                    rule_id,
                    notifier = notifier_name,
                    version = state.version,
                    "notification already claimed by another sender"
                );
                return Outcome::Conflict;
            }
            Err(e) => {
                tracing::warn!(
                    rule_id,
                    notifier = notifier_name,
                    error = %e,
                    "failed to mark notification pending"
                );
                return Outcome::Failed;
            }
        };

        let send = tokio::time::timeout(self.timeout, notifier.send(notification));
        let outcome = match send.await {
            Ok(Ok(())) => {
                self.metrics.inc_notifications_sent();
                tracing::info!(
                    rule_id,
                    notifier = notifier_name,
                    state = %ctx.rule.state,
                    "notification sent"
                );
                Outcome::Sent
            }
            Ok(Err(e)) => {
                self.metrics.inc_notifications_failed();
                tracing::warn!(
                    rule_id,
                    notifier = notifier_name,
                    error = %e,
                    "notification failed"
                );
                Outcome::Failed
            }
            Err(_) => {
                self.metrics.inc_notifications_failed();
                tracing::warn!(
                    rule_id,
                    notifier = notifier_name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "notification timed out"
                );
                Outcome::Failed
            }
        };

        let complete = SetCompleteCommand {
            id: state.id,
            version: pending_version,
            at: self.clock.now(),
        };
        match self.store.set_notification_state_to_complete(&complete).await {
            Ok(v) if v != pending_version + 1 => tracing::warn!(
                rule_id,
                notifier = notifier_name,
                expected = pending_version + 1,
                actual = v,
                "notification state changed between pending and completion"
            ),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    rule_id,
                    notifier = notifier_name,
                    error = %e,
                    "failed to mark notification complete"
                )
            }
        }

        outcome
    }
}
