use chrono::{DateTime, Duration, Utc};

use vigil_common::model::{AlertNotificationState, AlertState, NotificationStateKind};

use super::settings::NotifierSettings;

/// How long a `Pending` delivery blocks further attempts for the same pair.
const PENDING_WINDOW_SECONDS: i64 = 60;

/// Decides whether `notifier` should be called for the move from `prev` to
/// `new`, given the delivery state recorded for this alert and notifier.
pub fn should_notify(
    prev: AlertState,
    new: AlertState,
    notifier: &NotifierSettings,
    state: &AlertNotificationState,
    now: DateTime<Utc>,
) -> bool {
    if prev == new {
        if !notifier.send_reminder {
            return false;
        }
        if let Some(last) = state.updated_at {
            if last + notifier.reminder_interval() > now {
                return false;
            }
        }
        if new.is_ok_or_pending() {
            return false;
        }
    }

    if prev == AlertState::Unknown && new.is_ok_or_pending() {
        return false;
    }
    if prev == AlertState::Ok && new == AlertState::Pending {
        return false;
    }
    if prev == AlertState::Pending && new == AlertState::Ok {
        return false;
    }

    if state.state == NotificationStateKind::Pending {
        if let Some(last) = state.updated_at {
            if last + Duration::seconds(PENDING_WINDOW_SECONDS) > now {
                return false;
            }
        }
    }

    if new == AlertState::Ok && notifier.disable_resolve_message {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use AlertState::*;

    fn epoch(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn notifier(send_reminder: bool, frequency_seconds: i64) -> NotifierSettings {
        NotifierSettings {
            id: 1,
            uid: String::new(),
            org_id: 1,
            name: "ops".into(),
            kind: "webhook".into(),
            is_default: false,
            send_reminder,
            frequency_seconds,
            disable_resolve_message: false,
            settings: serde_json::Value::Null,
        }
    }

    fn delivered_at(secs: Option<i64>, kind: NotificationStateKind) -> AlertNotificationState {
        let mut s = AlertNotificationState::new(1, 1, 1, 1);
        s.state = kind;
        s.updated_at = secs.map(epoch);
        s
    }

    #[test]
    fn transitions() {
        let fresh = delivered_at(None, NotificationStateKind::Unknown);
        let n = notifier(false, 0);
        let now = epoch(1_000);

        let cases = [
            (Ok, Alerting, true),
            (Alerting, Ok, true),
            (Unknown, Alerting, true),
            (Unknown, Ok, false),
            (Unknown, Pending, false),
            (Ok, Pending, false),
            (Pending, Ok, false),
            (Pending, Alerting, true),
            (Ok, NoData, true),
            (Alerting, Alerting, false),
        ];
        for (prev, new, expected) in cases {
            assert_eq!(
                should_notify(prev, new, &n, &fresh, now),
                expected,
                "{prev} -> {new}"
            );
        }
    }

    #[test]
    fn reminder_waits_for_frequency() {
        let n = notifier(true, 300);
        let state = delivered_at(Some(1_000), NotificationStateKind::Completed);

        assert!(!should_notify(Alerting, Alerting, &n, &state, epoch(1_200)));
        assert!(should_notify(Alerting, Alerting, &n, &state, epoch(1_300)));
    }

    #[test]
    fn reminder_skips_ok_and_pending() {
        let n = notifier(true, 60);
        let state = delivered_at(Some(0), NotificationStateKind::Completed);
        assert!(!should_notify(Ok, Ok, &n, &state, epoch(1_000)));
        assert!(!should_notify(Pending, Pending, &n, &state, epoch(1_000)));
    }

    #[test]
    fn recent_pending_delivery_blocks() {
        let n = notifier(false, 0);
        let pending = delivered_at(Some(1_000), NotificationStateKind::Pending);
        assert!(!should_notify(Ok, Alerting, &n, &pending, epoch(1_030)));
        assert!(should_notify(Ok, Alerting, &n, &pending, epoch(1_061)));
    }

    #[test]
    fn resolve_message_can_be_disabled() {
        let mut n = notifier(false, 0);
        n.disable_resolve_message = true;
        let fresh = delivered_at(None, NotificationStateKind::Unknown);
        assert!(!should_notify(Alerting, Ok, &n, &fresh, epoch(1_000)));
        assert!(should_notify(Ok, Alerting, &n, &fresh, epoch(1_000)));
    }
}
