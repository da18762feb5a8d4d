use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::condition::{Condition, ConditionResult};
use super::eval_context::{EvalContext, EvalError, EvalMatch};
use super::rule::MAX_PERIOD_SECONDS;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub datasource: String,
    pub expr: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    /// `(value, timestamp_ms)`; `None` marks a gap.
    pub points: Vec<(Option<f64>, i64)>,
}

/// Executes datasource queries on behalf of conditions.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn query(&self, request: QueryRequest) -> Result<Vec<TimeSeries>, EvalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Avg,
    Min,
    Max,
    Sum,
    Count,
    Last,
    Median,
    Diff,
    PercentDiff,
    CountNonNull,
}

impl Reducer {
    pub fn reduce(&self, points: &[(Option<f64>, i64)]) -> Option<f64> {
        let values: Vec<f64> = points.iter().filter_map(|(v, _)| *v).collect();

        match self {
            Self::Count => Some(points.len() as f64),
            _ if values.is_empty() => None,
            Self::Avg => Some(values.iter().sum::<f64>() / values.len() as f64),
            Self::Min => values.iter().copied().reduce(f64::min),
            Self::Max => values.iter().copied().reduce(f64::max),
            Self::Sum => Some(values.iter().sum()),
            Self::Last => values.last().copied(),
            Self::CountNonNull => Some(values.len() as f64),
            Self::Median => {
                let mut sorted = values;
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    Some((sorted[mid - 1] + sorted[mid]) / 2.0)
                } else {
                    Some(sorted[mid])
                }
            }
            Self::Diff => Some(values[values.len() - 1] - values[0]),
            Self::PercentDiff => {
                let first = values[0];
                if first == 0.0 {
                    return None;
                }
                Some((values[values.len() - 1] - first) / first.abs() * 100.0)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvaluator {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Vec<f64>,
}

/// Threshold applied to a reduced series value.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawEvaluator")]
pub enum ThresholdEvaluator {
    Gt(f64),
    Lt(f64),
    WithinRange(f64, f64),
    OutsideRange(f64, f64),
    NoValue,
}

impl TryFrom<RawEvaluator> for ThresholdEvaluator {
    type Error = String;

    fn try_from(raw: RawEvaluator) -> Result<Self, Self::Error> {
        let param = |i: usize| {
            raw.params
                .get(i)
                .copied()
                .ok_or_else(|| format!("evaluator {:?} needs {} params", raw.kind, i + 1))
        };
        match raw.kind.as_str() {
            "gt" => Ok(Self::Gt(param(0)?)),
            "lt" => Ok(Self::Lt(param(0)?)),
            "within_range" => Ok(Self::WithinRange(param(0)?, param(1)?)),
            "outside_range" => Ok(Self::OutsideRange(param(0)?, param(1)?)),
            "no_value" => Ok(Self::NoValue),
            other => Err(format!("unknown evaluator type {other:?}")),
        }
    }
}

impl ThresholdEvaluator {
    pub fn eval(&self, reduced: Option<f64>) -> bool {
        let Some(v) = reduced else {
            return matches!(self, Self::NoValue);
        };
        match *self {
            Self::Gt(t) => v > t,
            Self::Lt(t) => v < t,
            Self::WithinRange(a, b) => {
                if a < b {
                    a < v && v < b
                } else {
                    b < v && v < a
                }
            }
            Self::OutsideRange(a, b) => {
                if a < b {
                    v < a || v > b
                } else {
                    v < b || v > a
                }
            }
            Self::NoValue => false,
        }
    }
}

fn default_range_seconds() -> i64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuerySettings {
    pub datasource: String,
    pub expr: String,
    #[serde(default = "default_range_seconds")]
    pub range_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryConditionSettings {
    query: QuerySettings,
    reducer: Reducer,
    evaluator: ThresholdEvaluator,
}

/// Queries a datasource, reduces every returned series and compares the
/// result against a threshold. Fires when any series matches.
pub struct QueryCondition {
    query: QuerySettings,
    range: Duration,
    reducer: Reducer,
    evaluator: ThresholdEvaluator,
    handler: Arc<dyn QueryHandler>,
}

impl QueryCondition {
    pub const KIND: &'static str = "query";

    pub fn from_settings(
        settings: &serde_json::Value,
        handler: Arc<dyn QueryHandler>,
    ) -> Result<Self, String> {
        let parsed: QueryConditionSettings =
            serde_json::from_value(settings.clone()).map_err(|e| e.to_string())?;
        let seconds = parsed.query.range_seconds;
        if seconds <= 0 {
            return Err("query.range_seconds must be > 0".into());
        }
        if seconds > MAX_PERIOD_SECONDS {
            return Err(format!(
                "query.range_seconds {seconds} exceeds {MAX_PERIOD_SECONDS}"
            ));
        }
        let range = Duration::try_seconds(seconds)
            .ok_or_else(|| format!("query.range_seconds {seconds} out of range"))?;
        Ok(Self {
            query: parsed.query,
            range,
            reducer: parsed.reducer,
            evaluator: parsed.evaluator,
            handler,
        })
    }
}

#[async_trait]
impl Condition for QueryCondition {
    fn kind(&self) -> &str {
        Self::KIND
    }

    async fn eval(&self, ctx: &EvalContext) -> Result<ConditionResult, EvalError> {
        let from = ctx.start_time.checked_sub_signed(self.range).ok_or_else(|| {
            EvalError::Query(format!(
                "query range of {}s reaches before the earliest supported time",
                self.query.range_seconds
            ))
        })?;
        let request = QueryRequest {
            datasource: self.query.datasource.clone(),
            expr: self.query.expr.clone(),
            from,
            to: ctx.start_time,
        };
        let series = self.handler.query(request).await?;

        let mut result = ConditionResult::default();
        let mut empty = 0usize;
        for s in &series {
            let reduced = self.reducer.reduce(&s.points);
            if reduced.is_none() {
                empty += 1;
            }
            if self.evaluator.eval(reduced) {
                result.matches.push(EvalMatch {
                    metric: s.name.clone(),
                    value: reduced,
                    tags: s.tags.clone(),
                });
            }
        }

        result.firing = !result.matches.is_empty();
        result.no_data_found = series.is_empty() || empty == series.len();
        if series.is_empty() && matches!(self.evaluator, ThresholdEvaluator::NoValue) {
            result.firing = true;
        }
        Ok(result)
    }
}
