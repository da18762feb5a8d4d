use chrono::{DateTime, Utc};

use vigil_common::model::AlertState;

use super::rule::Rule;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalSummary {
    pub errored: bool,
    pub firing: bool,
    pub no_data: bool,
}

/// Computes the state a rule moves to after an evaluation.
///
/// A rule with a pending period only reaches `Alerting` once it has been
/// `Pending` for at least `for_duration`.
pub fn next_state(
    rule: &Rule,
    prev: AlertState,
    summary: EvalSummary,
    now: DateTime<Utc>,
) -> AlertState {
    let candidate = if summary.errored {
        rule.execution_error_state.resolve(prev)
    } else if summary.firing {
        AlertState::Alerting
    } else if summary.no_data {
        rule.no_data_state.resolve(prev)
    } else {
        AlertState::Ok
    };

    if candidate != AlertState::Alerting || rule.for_duration.is_zero() {
        return candidate;
    }

    match prev {
        AlertState::Alerting => AlertState::Alerting,
        AlertState::Pending if now - rule.last_state_change >= rule.for_duration => {
            AlertState::Alerting
        }
        _ => AlertState::Pending,
    }
}
