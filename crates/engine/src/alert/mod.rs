mod condition;
mod eval_context;
mod eval_handler;
mod query;
mod rule;
mod state;
mod test_run;

#[cfg(test)]
pub(crate) mod testing;

pub use condition::{Condition, ConditionFactory, ConditionRegistry, ConditionResult};
pub use eval_context::{EvalContext, EvalError, EvalMatch, ResultLogEntry, StateModel};
pub use eval_handler::{DefaultEvalHandler, EvalHandler};
pub use query::{
    QueryCondition, QueryHandler, QueryRequest, QuerySettings, Reducer, ThresholdEvaluator,
    TimeSeries,
};
pub use rule::{
    ConditionDefinition, NotifierRef, Rule, RuleDefinition, RuleError, Severity, MAX_PERIOD_SECONDS,
};
pub use state::{next_state, EvalSummary};
pub use test_run::{test_rule, TestRunReport};
