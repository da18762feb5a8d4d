use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use vigil_common::model::{AlertState, ExecutionErrorOption, NoDataOption};

use super::condition::{Condition, ConditionRegistry};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A notifier bound to a rule, referenced by numeric id or by uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotifierRef {
    Id(i64),
    Uid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Persisted form of a rule, as stored and as written in rule files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDefinition {
    pub id: i64,
    pub org_id: i64,
    #[serde(default)]
    pub dashboard_id: i64,
    #[serde(default)]
    pub panel_id: i64,
    pub name: String,
    #[serde(default)]
    pub message: String,
    pub frequency_seconds: i64,
    #[serde(default)]
    pub for_seconds: i64,
    #[serde(default)]
    pub state: AlertState,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub state_changes: i64,
    #[serde(default)]
    pub last_state_change: Option<DateTime<Utc>>,
    #[serde(default)]
    pub no_data_state: NoDataOption,
    #[serde(default)]
    pub execution_error_state: ExecutionErrorOption,
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
    #[serde(default)]
    pub notifications: Vec<NotifierRef>,
    #[serde(default)]
    pub execution_error: Option<String>,
    #[serde(default)]
    pub eval_data: serde_json::Value,
}

/// Upper bound for rule frequency and pending period, in seconds.
pub const MAX_PERIOD_SECONDS: i64 = 366 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule {rule_id}: frequency cannot be zero or less")]
    FrequencyCannotBeZeroOrLess { rule_id: i64 },
    #[error("rule {rule_id}: frequency {seconds}s exceeds {MAX_PERIOD_SECONDS}s")]
    FrequencyTooLarge { rule_id: i64, seconds: i64 },
    #[error("rule {rule_id}: pending period cannot be negative")]
    NegativePendingPeriod { rule_id: i64 },
    #[error("rule {rule_id}: pending period {seconds}s exceeds {MAX_PERIOD_SECONDS}s")]
    PendingPeriodTooLarge { rule_id: i64, seconds: i64 },
    #[error("rule {rule_id}: at least one condition is required")]
    NoConditions { rule_id: i64 },
    #[error("rule {rule_id}: condition type {kind:?} is not registered")]
    UnknownConditionType { rule_id: i64, kind: String },
    #[error("rule {rule_id}: condition {index}: {reason}")]
    InvalidCondition {
        rule_id: i64,
        index: usize,
        reason: String,
    },
}

/// A validated, schedulable rule.
#[derive(Clone)]
pub struct Rule {
    pub id: i64,
    pub org_id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub name: String,
    pub message: String,
    pub frequency: i64,
    pub for_duration: Duration,
    pub state: AlertState,
    pub severity: Severity,
    pub state_changes: i64,
    pub last_state_change: DateTime<Utc>,
    pub no_data_state: NoDataOption,
    pub execution_error_state: ExecutionErrorOption,
    pub conditions: Vec<Arc<dyn Condition>>,
    pub notifications: Vec<NotifierRef>,
}

impl Rule {
    pub fn from_definition(
        def: RuleDefinition,
        registry: &ConditionRegistry,
        min_interval_seconds: i64,
    ) -> Result<Self, RuleError> {
        let rule_id = def.id;
        if def.frequency_seconds <= 0 {
            return Err(RuleError::FrequencyCannotBeZeroOrLess { rule_id });
        }
        let frequency = def.frequency_seconds.max(min_interval_seconds);
        if frequency > MAX_PERIOD_SECONDS {
            return Err(RuleError::FrequencyTooLarge {
                rule_id,
                seconds: frequency,
            });
        }
        if def.for_seconds < 0 {
            return Err(RuleError::NegativePendingPeriod { rule_id });
        }
        if def.for_seconds > MAX_PERIOD_SECONDS {
            return Err(RuleError::PendingPeriodTooLarge {
                rule_id,
                seconds: def.for_seconds,
            });
        }
        if def.conditions.is_empty() {
            return Err(RuleError::NoConditions { rule_id });
        }

        let conditions = def
            .conditions
            .iter()
            .enumerate()
            .map(|(index, cond)| registry.build(rule_id, index, cond))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: def.id,
            org_id: def.org_id,
            dashboard_id: def.dashboard_id,
            panel_id: def.panel_id,
            name: def.name,
            message: def.message,
            frequency,
            for_duration: Duration::seconds(def.for_seconds),
            state: def.state,
            severity: def.severity,
            state_changes: def.state_changes,
            last_state_change: def.last_state_change.unwrap_or_default(),
            no_data_state: def.no_data_state,
            execution_error_state: def.execution_error_state,
            conditions,
            notifications: def.notifications,
        })
    }

    pub fn is_paused(&self) -> bool {
        self.state == AlertState::Paused
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.conditions.iter().map(|c| c.kind()).collect();
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("org_id", &self.org_id)
            .field("name", &self.name)
            .field("frequency", &self.frequency)
            .field("state", &self.state)
            .field("state_changes", &self.state_changes)
            .field("conditions", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::{registry_with_static, static_condition};

    fn definition() -> RuleDefinition {
        serde_yaml::from_str(
            r#"
id: 7
org_id: 1
name: high cpu
frequency_seconds: 10
conditions:
  - type: static
    settings: { firing: true }
notifications: [3, "ops-slack"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn valid_definition_builds_rule() {
        let rule = Rule::from_definition(definition(), &registry_with_static(), 1).unwrap();
        assert_eq!(rule.id, 7);
        assert_eq!(rule.frequency, 10);
        assert_eq!(rule.state, AlertState::Unknown);
        assert_eq!(rule.conditions.len(), 1);
        assert_eq!(
            rule.notifications,
            vec![NotifierRef::Id(3), NotifierRef::Uid("ops-slack".into())]
        );
    }

    #[test]
    fn zero_frequency_rejected() {
        let mut def = definition();
        def.frequency_seconds = 0;
        let err = Rule::from_definition(def, &registry_with_static(), 1).unwrap_err();
        assert!(matches!(err, RuleError::FrequencyCannotBeZeroOrLess { rule_id: 7 }));
    }

    #[test]
    fn negative_frequency_rejected() {
        let mut def = definition();
        def.frequency_seconds = -5;
        assert!(Rule::from_definition(def, &registry_with_static(), 1).is_err());
    }

    #[test]
    fn frequency_raised_to_min_interval() {
        let rule = Rule::from_definition(definition(), &registry_with_static(), 30).unwrap();
        assert_eq!(rule.frequency, 30);
    }

    #[test]
    fn frequency_above_bound_rejected() {
        let mut def = definition();
        def.frequency_seconds = MAX_PERIOD_SECONDS;
        assert!(Rule::from_definition(def.clone(), &registry_with_static(), 1).is_ok());

        def.frequency_seconds = i64::MAX / 10;
        let err = Rule::from_definition(def, &registry_with_static(), 1).unwrap_err();
        assert!(matches!(err, RuleError::FrequencyTooLarge { rule_id: 7, .. }));
    }

    #[test]
    fn min_interval_above_bound_rejected() {
        let err =
            Rule::from_definition(definition(), &registry_with_static(), i64::MAX).unwrap_err();
        assert!(matches!(err, RuleError::FrequencyTooLarge { .. }));
    }

    #[test]
    fn pending_period_above_bound_rejected() {
        let mut def = definition();
        def.for_seconds = MAX_PERIOD_SECONDS;
        let rule = Rule::from_definition(def.clone(), &registry_with_static(), 1).unwrap();
        assert_eq!(rule.for_duration, Duration::seconds(MAX_PERIOD_SECONDS));

        def.for_seconds = i64::MAX;
        let err = Rule::from_definition(def, &registry_with_static(), 1).unwrap_err();
        assert!(matches!(err, RuleError::PendingPeriodTooLarge { rule_id: 7, .. }));
    }

    #[test]
    fn unknown_condition_type_rejected() {
        let mut def = definition();
        def.conditions[0].kind = "graphite_magic".into();
        let err = Rule::from_definition(def, &registry_with_static(), 1).unwrap_err();
        assert!(err.to_string().contains("graphite_magic"));
    }

    #[test]
    fn missing_conditions_rejected() {
        let mut def = definition();
        def.conditions.clear();
        let err = Rule::from_definition(def, &registry_with_static(), 1).unwrap_err();
        assert!(matches!(err, RuleError::NoConditions { .. }));
    }

    #[test]
    fn debug_lists_condition_kinds() {
        let mut rule = Rule::from_definition(definition(), &registry_with_static(), 1).unwrap();
        rule.conditions.push(static_condition(false));
        let dbg = format!("{rule:?}");
        assert!(dbg.contains("static"));
        assert!(dbg.contains("high cpu"));
    }
}
