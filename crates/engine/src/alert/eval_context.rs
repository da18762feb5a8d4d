use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use vigil_common::model::AlertState;

use super::rule::Rule;
use super::state::{next_state, EvalSummary};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
    #[error("evaluation aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMatch {
    pub metric: String,
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl EvalMatch {
    pub fn new(metric: &str, value: Option<f64>) -> Self {
        Self {
            metric: metric.to_string(),
            value,
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultLogEntry {
    pub message: String,
    pub data: serde_json::Value,
}

/// Scratch record for one evaluation of one rule.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub rule: Rule,
    pub prev_state: AlertState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub firing: bool,
    pub no_data_found: bool,
    pub error: Option<EvalError>,
    pub logs: Vec<ResultLogEntry>,
    pub matches: Vec<EvalMatch>,
    pub condition_evals: String,
    pub attempt: u32,
    pub is_test_run: bool,
}

/// Presentation of the rule's current state for notifiers and annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateModel {
    pub color: &'static str,
    pub text: &'static str,
}

impl EvalContext {
    pub fn new(rule: Rule, start_time: DateTime<Utc>) -> Self {
        Self {
            prev_state: rule.state,
            rule,
            start_time,
            end_time: None,
            firing: false,
            no_data_found: false,
            error: None,
            logs: Vec::new(),
            matches: Vec::new(),
            condition_evals: String::new(),
            attempt: 1,
            is_test_run: false,
        }
    }

    pub fn log(&mut self, message: impl Into<String>, data: serde_json::Value) {
        self.logs.push(ResultLogEntry {
            message: message.into(),
            data,
        });
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
            .unwrap_or(0)
    }

    /// State the rule should move to given this evaluation's outcome.
    pub fn new_state(&self, now: DateTime<Utc>) -> AlertState {
        let summary = EvalSummary {
            errored: self.error.is_some(),
            firing: self.firing,
            no_data: self.no_data_found,
        };
        next_state(&self.rule, self.prev_state, summary, now)
    }

    pub fn state_model(&self) -> StateModel {
        let color = match self.rule.state {
            AlertState::Ok => "#36a64f",
            AlertState::Alerting => "#d63232",
            AlertState::NoData | AlertState::Pending => "#f2c744",
            AlertState::Paused | AlertState::Unknown => "#888888",
        };
        StateModel {
            color,
            text: self.rule.state.title(),
        }
    }

    /// Title used by notifiers and annotations, e.g. `[Alerting] high cpu`.
    pub fn notification_title(&self) -> String {
        format!("[{}] {}", self.rule.state.title(), self.rule.name)
    }

    /// Payload persisted alongside a state change.
    pub fn eval_data(&self) -> serde_json::Value {
        let mut data = serde_json::json!({ "evalMatches": self.matches });
        if let Some(e) = &self.error {
            data["error"] = serde_json::Value::String(e.to_string());
        }
        if self.no_data_found {
            data["noData"] = serde_json::Value::Bool(true);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::rule_with;

    #[test]
    fn state_model_follows_rule_state() {
        let mut ctx = EvalContext::new(rule_with(vec![]), Utc::now());
        ctx.rule.state = AlertState::Alerting;
        assert_eq!(ctx.state_model().text, "Alerting");
        ctx.rule.state = AlertState::Ok;
        assert_eq!(ctx.state_model().color, "#36a64f");
    }

    #[test]
    fn new_context_captures_previous_state() {
        let mut rule = rule_with(vec![]);
        rule.state = AlertState::Alerting;
        let ctx = EvalContext::new(rule, Utc::now());
        assert_eq!(ctx.prev_state, AlertState::Alerting);
        assert_eq!(ctx.attempt, 1);
        assert!(ctx.error.is_none());
    }

    #[test]
    fn eval_data_includes_error_and_matches() {
        let mut ctx = EvalContext::new(rule_with(vec![]), Utc::now());
        ctx.matches.push(EvalMatch::new("cpu", Some(93.5)));
        ctx.error = Some(EvalError::Query("datasource down".into()));

        let data = ctx.eval_data();
        assert_eq!(data["evalMatches"][0]["metric"], "cpu");
        assert_eq!(data["evalMatches"][0]["value"], 93.5);
        assert!(data["error"].as_str().unwrap().contains("datasource down"));
    }

    #[test]
    fn title_uses_current_rule_state() {
        let mut ctx = EvalContext::new(rule_with(vec![]), Utc::now());
        ctx.rule.state = AlertState::Ok;
        assert_eq!(ctx.notification_title(), "[OK] test rule");
    }

    #[test]
    fn duration_zero_until_finished() {
        let start = Utc::now();
        let mut ctx = EvalContext::new(rule_with(vec![]), start);
        assert_eq!(ctx.duration_ms(), 0);
        ctx.end_time = Some(start + chrono::Duration::milliseconds(250));
        assert_eq!(ctx.duration_ms(), 250);
    }
}
