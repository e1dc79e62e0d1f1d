use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::usage::{IncrementOutcome, UsageStatus};
use crate::web::AppState;

use super::json_error;

/// Request body for both usage operations. Every field is untrusted and
/// optional until validated.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub usage_type: Option<String>,
}

impl UsageRequest {
    /// Presence check for required fields; empty strings don't count.
    fn validate(&self) -> Option<(&str, &str)> {
        match (self.user_id.as_deref(), self.usage_type.as_deref()) {
            (Some(user_id), Some(usage_type)) if !user_id.is_empty() && !usage_type.is_empty() => {
                Some((user_id, usage_type))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UsageActionQuery {
    #[serde(default)]
    pub action: Option<String>,
}

/// Usage check result (API response)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatusView {
    pub can_perform: bool,
    pub is_pro: bool,
    pub current_usage: i64,
    pub usage_limit: i64,
    pub reset_at: Option<String>,
}

impl From<UsageStatus> for UsageStatusView {
    fn from(status: UsageStatus) -> Self {
        Self {
            can_perform: status.can_perform,
            is_pro: status.is_pro,
            current_usage: status.current_usage,
            usage_limit: status.usage_limit,
            reset_at: status.reset_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IncrementSuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitReachedResponse {
    pub success: bool,
    pub error: String,
    pub limit_reached: bool,
}

/// POST /api/check-usage
/// Advisory check of a user's remaining quota for one usage type
pub async fn check_usage(
    State(state): State<AppState>,
    Json(request): Json<UsageRequest>,
) -> Response {
    let Some((user_id, usage_type)) = request.validate() else {
        return json_error(StatusCode::BAD_REQUEST, "Missing userId or usageType").into_response();
    };

    run_check(&state, user_id, usage_type).await
}

/// POST /api/increment-usage
/// Record one performed action; rejects with 403 when the limit is hit
pub async fn increment_usage(
    State(state): State<AppState>,
    Json(request): Json<UsageRequest>,
) -> Response {
    let Some((user_id, usage_type)) = request.validate() else {
        return json_error(StatusCode::BAD_REQUEST, "Missing userId or usageType").into_response();
    };

    run_increment(&state, user_id, usage_type).await
}

/// POST /api/usage?action=check|increment
/// Combined facade over both usage operations. Unknown actions are
/// rejected explicitly rather than falling through.
pub async fn usage_dispatch(
    State(state): State<AppState>,
    Query(query): Query<UsageActionQuery>,
    Json(request): Json<UsageRequest>,
) -> Response {
    let Some((user_id, usage_type)) = request.validate() else {
        return json_error(StatusCode::BAD_REQUEST, "Missing userId or usageType").into_response();
    };

    match query.action.as_deref() {
        Some("check") => run_check(&state, user_id, usage_type).await,
        Some("increment") => run_increment(&state, user_id, usage_type).await,
        _ => json_error(
            StatusCode::BAD_REQUEST,
            "Invalid action. Use ?action=check or ?action=increment",
        )
        .into_response(),
    }
}

async fn run_check(state: &AppState, user_id: &str, usage_type: &str) -> Response {
    metrics::counter!("usage.check.requests").increment(1);

    match state.gate.check(user_id, usage_type).await {
        Ok(status) => Json(UsageStatusView::from(status)).into_response(),
        Err(e) => {
            error!(user_id = %user_id, usage_type = %usage_type, error = ?e, "Usage check failed");
            metrics::counter!("usage.check.errors").increment(1);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response()
        }
    }
}

async fn run_increment(state: &AppState, user_id: &str, usage_type: &str) -> Response {
    metrics::counter!("usage.increment.requests").increment(1);

    match state.gate.increment(user_id, usage_type).await {
        Ok(IncrementOutcome::Applied) => {
            Json(IncrementSuccessResponse { success: true }).into_response()
        }
        Ok(IncrementOutcome::LimitReached) => {
            metrics::counter!("usage.increment.limit_reached").increment(1);
            (
                StatusCode::FORBIDDEN,
                Json(LimitReachedResponse {
                    success: false,
                    error: "Usage limit exceeded".to_string(),
                    limit_reached: true,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(user_id = %user_id, usage_type = %usage_type, error = ?e, "Usage increment failed");
            metrics::counter!("usage.increment.errors").increment(1);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response()
        }
    }
}
