//! Fixtures shared by the crate's unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

use vigil_common::model::{AlertState, ExecutionErrorOption, NoDataOption};

use super::condition::{Condition, ConditionRegistry, ConditionResult};
use super::eval_context::{EvalContext, EvalError, EvalMatch};
use super::rule::{NotifierRef, Rule, Severity};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticCondition {
    #[serde(default)]
    pub firing: bool,
    #[serde(default)]
    pub no_data: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
impl Condition for StaticCondition {
    fn kind(&self) -> &str {
        "static"
    }

    async fn eval(&self, _ctx: &EvalContext) -> Result<ConditionResult, EvalError> {
        if let Some(e) = &self.error {
            return Err(EvalError::Query(e.clone()));
        }
        let matches = if self.firing {
            vec![EvalMatch::new("static", Some(1.0))]
        } else {
            Vec::new()
        };
        Ok(ConditionResult {
            firing: self.firing,
            no_data_found: self.no_data,
            matches,
        })
    }
}

pub fn static_condition(firing: bool) -> Arc<dyn Condition> {
    Arc::new(StaticCondition {
        firing,
        ..Default::default()
    })
}

pub fn no_data_condition() -> Arc<dyn Condition> {
    Arc::new(StaticCondition {
        no_data: true,
        ..Default::default()
    })
}

pub fn failing_condition(message: &str) -> Arc<dyn Condition> {
    Arc::new(StaticCondition {
        error: Some(message.to_string()),
        ..Default::default()
    })
}

pub fn registry_with_static() -> ConditionRegistry {
    let mut registry = ConditionRegistry::new();
    registry.register("static", |settings| {
        let cond: StaticCondition = if settings.is_null() {
            StaticCondition::default()
        } else {
            serde_json::from_value(settings.clone()).map_err(|e| e.to_string())?
        };
        Ok(Arc::new(cond) as Arc<dyn Condition>)
    });
    registry
}

pub fn epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn rule_with(conditions: Vec<Arc<dyn Condition>>) -> Rule {
    Rule {
        id: 1,
        org_id: 1,
        dashboard_id: 0,
        panel_id: 0,
        name: "test rule".into(),
        message: String::new(),
        frequency: 10,
        for_duration: Duration::zero(),
        state: AlertState::Unknown,
        severity: Severity::Warning,
        state_changes: 0,
        last_state_change: epoch(0),
        no_data_state: NoDataOption::NoData,
        execution_error_state: ExecutionErrorOption::Pending,
        conditions,
        notifications: vec![NotifierRef::Id(1)],
    }
}
