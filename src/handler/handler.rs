use crate::app::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        // every provider-facing path shares one handler
        .route("/webhook", post(super::webhook::webhook_handler))
        .route("/api/telnyx/webhook", post(super::webhook::webhook_handler))
        .route(
            "/api/telnyx/webhook/failover",
            post(super::webhook::webhook_handler),
        )
        .route("/api/webhooks/telnyx", post(super::webhook::webhook_handler))
        .route(
            "/api/telnyx/calls",
            get(super::sync::sync_handler).post(super::sync::sync_handler),
        )
        .route(
            "/api/sync/recordings",
            get(super::sync::sync_handler).post(super::sync::sync_handler),
        )
        .route("/api/calls/active", get(super::calls::active_calls))
        .route("/api/calls/history", get(super::calls::call_history))
        .route("/api/calls/recording", post(super::calls::save_call))
        .route(
            "/api/calls/recording/{id}",
            get(super::calls::get_call).put(super::calls::update_call),
        )
        .route("/api/calls/log", post(super::calls::log_call))
        .route("/api/metrics", get(super::dashboard::metrics))
        .route("/api/ai-metrics", get(super::dashboard::ai_metrics))
        .route("/api/agent-outcomes", get(super::dashboard::agent_outcomes))
        .route("/api/outcome-data", get(super::dashboard::agent_outcomes))
        .route("/api/volume-data", get(super::dashboard::volume_data))
        .route("/api/recent-calls", get(super::dashboard::recent_calls))
        .route("/api/territories", get(super::dashboard::territories))
        .route("/api/analyze", post(super::insights::analyze_handler))
        .route(
            "/api/summarize-call",
            post(super::insights::summarize_call_handler),
        )
}

async fn health_handler(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "ok",
        "version": crate::version::version_info(),
        "activeCalls": state.correlation.active().await.len(),
        "telephonyConfigured": state.telephony.is_some(),
        "insightsConfigured": state.insights.is_some(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}
