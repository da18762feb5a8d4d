use async_trait::async_trait;
use std::sync::Arc;

use vigil_common::clock::Clock;

use super::eval_context::EvalContext;

/// Runs a rule's condition chain against a fresh context.
#[async_trait]
pub trait EvalHandler: Send + Sync {
    async fn eval(&self, ctx: &mut EvalContext);
}

/// Evaluates conditions in order, stopping at the first error or the
/// first condition that does not fire.
pub struct DefaultEvalHandler {
    clock: Arc<dyn Clock>,
}

impl DefaultEvalHandler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl EvalHandler for DefaultEvalHandler {
    async fn eval(&self, ctx: &mut EvalContext) {
        let conditions = ctx.rule.conditions.clone();
        let mut firing = !conditions.is_empty();
        let mut evals = Vec::with_capacity(conditions.len());

        for (index, condition) in conditions.iter().enumerate() {
            let result = condition.eval(ctx).await;
            match result {
                Ok(result) => {
                    evals.push(format!("[{index}: {}]", result.firing));
                    ctx.no_data_found |= result.no_data_found;
                    ctx.matches.extend(result.matches);
                    if !result.firing {
                        firing = false;
                        break;
                    }
                }
                Err(e) => {
                    ctx.log(
                        format!("condition {index} failed"),
                        serde_json::json!({ "kind": condition.kind(), "error": e.to_string() }),
                    );
                    tracing::debug!(rule_id = ctx.rule.id, index, error = %e, "condition failed");
                    ctx.error = Some(e);
                    firing = false;
                    break;
                }
            }
        }

        ctx.firing = firing;
        ctx.condition_evals = format!("{} = {}", evals.join(" AND "), firing);
        ctx.end_time = Some(self.clock.now());
    }
}
