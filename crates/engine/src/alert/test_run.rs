use serde::Serialize;

use vigil_common::clock::Clock;
use vigil_common::model::AlertState;

use super::eval_context::{EvalContext, EvalMatch, ResultLogEntry};
use super::eval_handler::EvalHandler;
use super::rule::Rule;

/// Outcome of a dry-run evaluation; nothing is persisted or sent.
#[derive(Debug, Clone, Serialize)]
pub struct TestRunReport {
    pub rule_id: i64,
    pub firing: bool,
    pub no_data: bool,
    pub state: AlertState,
    pub error: Option<String>,
    pub condition_evals: String,
    pub matches: Vec<EvalMatch>,
    pub logs: Vec<ResultLogEntry>,
    pub duration_ms: i64,
}

impl From<&EvalContext> for TestRunReport {
    fn from(ctx: &EvalContext) -> Self {
        Self {
            rule_id: ctx.rule.id,
            firing: ctx.firing,
            no_data: ctx.no_data_found,
            state: ctx.rule.state,
            error: ctx.error.as_ref().map(|e| e.to_string()),
            condition_evals: ctx.condition_evals.clone(),
            matches: ctx.matches.clone(),
            logs: ctx.logs.clone(),
            duration_ms: ctx.duration_ms(),
        }
    }
}

pub async fn test_rule(rule: Rule, handler: &dyn EvalHandler, clock: &dyn Clock) -> EvalContext {
    let mut ctx = EvalContext::new(rule, clock.now());
    ctx.is_test_run = true;
    handler.eval(&mut ctx).await;
    ctx.rule.state = ctx.new_state(clock.now());
    ctx
}
