use axum::routing::{get, post};
use axum::Router;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::net::TcpListener;

use vigil_common::clock::Clock;

use super::{alerts, health, metrics};
use crate::alert::{ConditionRegistry, EvalHandler};
use crate::metrics::EngineMetrics;
use crate::store::AlertStore;

#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<EngineMetrics>,
    pub alerts: Arc<dyn AlertStore>,
    pub registry: Arc<ConditionRegistry>,
    pub eval_handler: Arc<dyn EvalHandler>,
    pub clock: Arc<dyn Clock>,
    pub min_interval_seconds: i64,
    pub ready: Arc<AtomicBool>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::metrics))
        .route("/api/alerts/:alert_id/pause", post(alerts::pause))
        .route("/api/alerts/:alert_id/unpause", post(alerts::unpause))
        .route("/api/rules/test", post(alerts::test_rule))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(listener, app).await
}
