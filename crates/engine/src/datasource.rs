//! Prometheus-compatible HTTP datasource for `query` conditions.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::alert::{EvalError, QueryHandler, QueryRequest, TimeSeries};

const DEFAULT_STEP_SECONDS: i64 = 15;

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryRangeData>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<MatrixSeries>,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Runs range queries against `GET {base}/api/v1/query_range`.
pub struct PrometheusQueryHandler {
    client: Client,
    datasources: BTreeMap<String, String>,
    step_seconds: i64,
}

impl PrometheusQueryHandler {
    pub fn new(client: Client, datasources: BTreeMap<String, String>) -> Self {
        Self {
            client,
            datasources,
            step_seconds: DEFAULT_STEP_SECONDS,
        }
    }

    pub fn with_step_seconds(mut self, step_seconds: i64) -> Self {
        self.step_seconds = step_seconds.max(1);
        self
    }
}

fn series_name(metric: &BTreeMap<String, String>) -> String {
    let name = metric.get("__name__").cloned().unwrap_or_default();
    let labels: Vec<String> = metric
        .iter()
        .filter(|(k, _)| k.as_str() != "__name__")
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if labels.is_empty() {
        name
    } else {
        format!("{name}{{{}}}", labels.join(", "))
    }
}

fn to_series(m: MatrixSeries) -> TimeSeries {
    let points = m
        .values
        .iter()
        .map(|(ts, raw)| {
            let value = raw.parse::<f64>().ok().filter(|v| v.is_finite());
            (value, (ts * 1000.0) as i64)
        })
        .collect();
    let name = series_name(&m.metric);
    let mut tags = m.metric;
    tags.remove("__name__");
    TimeSeries { name, tags, points }
}

#[async_trait]
impl QueryHandler for PrometheusQueryHandler {
    async fn query(&self, request: QueryRequest) -> Result<Vec<TimeSeries>, EvalError> {
        let base = self
            .datasources
            .get(&request.datasource)
            .ok_or_else(|| {
                EvalError::Query(format!("unknown datasource {:?}", request.datasource))
            })?;
        let url = format!("{}/api/v1/query_range", base.trim_end_matches('/'));

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("query", request.expr.clone()),
                ("start", request.from.timestamp().to_string()),
                ("end", request.to.timestamp().to_string()),
                ("step", self.step_seconds.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EvalError::Query(e.to_string()))?;

        let status = resp.status();
        let body: QueryRangeResponse = resp
            .json()
            .await
            .map_err(|e| EvalError::Query(format!("{status}: {e}")))?;
        if body.status != "success" {
            return Err(EvalError::Query(
                body.error.unwrap_or_else(|| format!("query failed with {status}")),
            ));
        }

        Ok(body
            .data
            .map(|d| d.result.into_iter().map(to_series).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::DateTime;
    use std::collections::HashMap;

    async fn serve(body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/api/v1/query_range",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let mut body = body.clone();
                async move {
                    body["echo"] = serde_json::json!(params);
                    Json(body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request(datasource: &str) -> QueryRequest {
        QueryRequest {
            datasource: datasource.into(),
            expr: "up".into(),
            from: DateTime::from_timestamp(1_000, 0).unwrap(),
            to: DateTime::from_timestamp(1_300, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn parses_matrix_result() {
        let base = serve(serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": {"__name__": "up", "job": "api"},
                    "values": [[1000.0, "1"], [1015.0, "NaN"], [1030.0, "0.5"]]
                }]
            }
        }))
        .await;
        let handler = PrometheusQueryHandler::new(
            Client::new(),
            BTreeMap::from([("prom".to_string(), base)]),
        );

        let series = handler.query(request("prom")).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "up{job=api}");
        assert_eq!(series[0].tags["job"], "api");
        assert_eq!(
            series[0].points,
            vec![(Some(1.0), 1_000_000), (None, 1_015_000), (Some(0.5), 1_030_000)]
        );
    }

    #[tokio::test]
    async fn error_status_is_query_error() {
        let base = serve(serde_json::json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "parse error"
        }))
        .await;
        let handler = PrometheusQueryHandler::new(
            Client::new(),
            BTreeMap::from([("prom".to_string(), base)]),
        );

        let err = handler.query(request("prom")).await.unwrap_err();
        assert_eq!(err, EvalError::Query("parse error".into()));
    }

    #[tokio::test]
    async fn unknown_datasource_is_rejected() {
        let handler = PrometheusQueryHandler::new(Client::new(), BTreeMap::new());
        let err = handler.query(request("missing")).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn series_name_without_labels() {
        let metric = BTreeMap::from([("__name__".to_string(), "up".to_string())]);
        assert_eq!(series_name(&metric), "up");
    }
}
