use super::{bounded, error_response};
use crate::app::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct VolumeQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

fn respond<T: Serialize>(result: anyhow::Result<T>, what: &str) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            error!("failed to fetch {}: {:#}", what, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch {}", what),
            )
        }
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let result = bounded(&state, state.dashboard.metrics()).await;
    respond(result.map(|m| m.cards()), "metrics")
}

pub async fn ai_metrics(State(state): State<AppState>) -> Response {
    let result = bounded(&state, state.dashboard.ai_agent_metrics()).await;
    respond(result.map(|m| m.cards()), "AI metrics")
}

pub async fn agent_outcomes(State(state): State<AppState>) -> Response {
    let result = bounded(&state, state.dashboard.lead_quality_distribution()).await;
    respond(result, "agent outcomes")
}

pub async fn volume_data(
    State(state): State<AppState>,
    Query(query): Query<VolumeQuery>,
) -> Response {
    let days = query.days.unwrap_or(7);
    let result = bounded(&state, state.dashboard.daily_volume(days)).await;
    respond(result, "volume data")
}

pub async fn recent_calls(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(10);
    let result = bounded(&state, state.dashboard.recent_calls(limit)).await;
    respond(result, "recent calls")
}

pub async fn territories(State(state): State<AppState>) -> Response {
    let result = bounded(&state, state.dashboard.territories()).await;
    respond(result, "territories")
}
