use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use vigil_common::model::AlertState;

use super::ApiState;
use crate::alert::{self, Rule, RuleDefinition, TestRunReport};
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    #[serde(default = "default_org")]
    pub org_id: i64,
}

fn default_org() -> i64 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PauseResponse {
    pub alert_id: i64,
    pub state: AlertState,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound { .. } => api_error(StatusCode::NOT_FOUND, e),
        other => {
            tracing::error!(error = %other, "alert store request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other)
        }
    }
}

async fn set_paused(
    state: ApiState,
    alert_id: i64,
    org_id: i64,
    paused: bool,
) -> Result<Json<PauseResponse>, ApiError> {
    let now = state.clock.now();
    let new_state = state
        .alerts
        .pause_alert(org_id, alert_id, paused, now)
        .await
        .map_err(store_error)?;
    tracing::info!(alert_id, org_id, paused, "alert pause state changed");
    Ok(Json(PauseResponse {
        alert_id,
        state: new_state,
    }))
}

pub async fn pause(
    State(state): State<ApiState>,
    Path(alert_id): Path<i64>,
    body: Option<Json<PauseRequest>>,
) -> Result<Json<PauseResponse>, ApiError> {
    let org_id = body.map(|b| b.org_id).unwrap_or_else(default_org);
    set_paused(state, alert_id, org_id, true).await
}

pub async fn unpause(
    State(state): State<ApiState>,
    Path(alert_id): Path<i64>,
    body: Option<Json<PauseRequest>>,
) -> Result<Json<PauseResponse>, ApiError> {
    let org_id = body.map(|b| b.org_id).unwrap_or_else(default_org);
    set_paused(state, alert_id, org_id, false).await
}

/// Evaluates a rule definition once without persisting state or notifying.
pub async fn test_rule(
    State(state): State<ApiState>,
    Json(def): Json<RuleDefinition>,
) -> Result<Json<TestRunReport>, ApiError> {
    let rule = Rule::from_definition(def, &state.registry, state.min_interval_seconds)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let ctx = alert::test_rule(rule, state.eval_handler.as_ref(), state.clock.as_ref()).await;
    Ok(Json(TestRunReport::from(&ctx)))
}
