use super::{bounded, error_response};
use crate::app::AppState;
use crate::callrecord::CallRecordPatch;
use crate::insights::{self, InsightData, InsightError, RETRY_AFTER_SECS};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeRequest {
    pub user_query: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    pub call_control_id: String,
}

fn quota_exceeded() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
        Json(json!({
            "error": "AI analysis temporarily unavailable due to quota limits. Please try again later.",
            "retryAfter": RETRY_AFTER_SECS,
        })),
    )
        .into_response()
}

/// The unavailable panel rides along so the dashboard can render it as is.
fn analysis_unavailable(status: StatusCode, message: &str) -> Response {
    let mut body = serde_json::to_value(InsightData::unavailable()).unwrap_or_default();
    body["error"] = json!(message);
    (status, Json(body)).into_response()
}

pub async fn analyze_handler(
    State(state): State<AppState>,
    payload: Option<Json<AnalyzeRequest>>,
) -> Response {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let Some(generator) = state.insights.clone() else {
        return analysis_unavailable(
            StatusCode::SERVICE_UNAVAILABLE,
            "insight generator is not configured",
        );
    };
    let context = match bounded(&state, state.dashboard.analysis_context()).await {
        Ok(context) => context,
        Err(e) => {
            error!("failed to build analysis context: {:#}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate insights");
        }
    };

    match insights::analyze(generator.as_ref(), &context, request.user_query.as_deref()).await {
        Ok(data) => Json(data).into_response(),
        Err(InsightError::QuotaExceeded) => quota_exceeded(),
        Err(e) => {
            warn!("analysis failed: {}", e);
            analysis_unavailable(StatusCode::BAD_GATEWAY, "Failed to generate insights")
        }
    }
}

pub async fn summarize_call_handler(
    State(state): State<AppState>,
    Json(request): Json<SummarizeRequest>,
) -> Response {
    let id = request.call_control_id;
    let record = match bounded(&state, state.repository.get_by_control_id(&id)).await {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(e) => {
            error!(call_control_id = id, "failed to load call: {:#}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate summary");
        }
    };
    let Some(generator) = state.insights.clone() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "insight generator is not configured",
        );
    };

    let summary = match insights::summarize_call(generator.as_ref(), &record).await {
        Ok(summary) => summary,
        Err(InsightError::QuotaExceeded) => return quota_exceeded(),
        Err(e) => {
            warn!(call_control_id = id, "summary failed: {}", e);
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Failed to generate summary",
                    "summary": "Could not generate summary.",
                })),
            )
                .into_response();
        }
    };

    let patch = CallRecordPatch {
        ai_summary: Some(summary.clone()),
        ..Default::default()
    };
    match bounded(&state, state.repository.update_by_control_id(&id, &patch)).await {
        Ok(_) => info!(call_control_id = id, "call summary stored"),
        Err(e) => warn!(call_control_id = id, "failed to store call summary: {:#}", e),
    }
    Json(json!({ "summary": summary })).into_response()
}
