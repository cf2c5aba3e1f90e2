use super::{bounded, error_response};
use crate::app::AppState;
use crate::callrecord::{CallDirection, CallRecord, CallRecordFilter, CallRecordPatch};
use crate::classifier::{self, Classification, LeadQuality, NORMAL_HANGUP};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::{error, info};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub direction: Option<String>,
    pub lead_quality: Option<String>,
    pub has_recording: Option<bool>,
    pub has_transcript: Option<bool>,
    pub limit: Option<u32>,
}

fn selected(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

impl HistoryQuery {
    /// `all` or an empty value means no filter.
    pub fn to_filter(&self, assistant_id: Option<&str>) -> Result<CallRecordFilter, String> {
        let direction = selected(self.direction.as_deref())
            .map(CallDirection::from_str)
            .transpose()
            .map_err(|e| e.to_string())?;
        let lead_quality = selected(self.lead_quality.as_deref())
            .map(LeadQuality::from_str)
            .transpose()
            .map_err(|e| e.to_string())?;
        Ok(CallRecordFilter {
            direction,
            lead_quality,
            has_recording: self.has_recording.unwrap_or(false),
            has_transcript: self.has_transcript.unwrap_or(false),
            assistant_id: assistant_id.map(str::to_string),
            limit: self.limit,
        })
    }
}

pub async fn active_calls(State(state): State<AppState>) -> Response {
    Json(state.correlation.active().await).into_response()
}

pub async fn call_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let filter = match query.to_filter(state.scope.assistant_id()) {
        Ok(filter) => filter,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match bounded(&state, state.repository.find(&filter)).await {
        Ok(calls) => {
            info!(count = calls.len(), "retrieved call history");
            Json(calls).into_response()
        }
        Err(e) => {
            error!("failed to fetch call history: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch call history")
        }
    }
}

pub async fn get_call(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match bounded(&state, state.repository.get_by_control_id(&id)).await {
        Ok(Some(call)) => Json(call).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(e) => {
            error!(call_control_id = id, "failed to fetch call: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch call recording")
        }
    }
}

pub async fn update_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<CallRecordPatch>,
) -> Response {
    match bounded(&state, state.repository.update_by_control_id(&id, &patch)).await {
        Ok(Some(call)) => Json(call).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(e) => {
            error!(call_control_id = id, "failed to update call: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update call recording")
        }
    }
}

pub async fn save_call(State(state): State<AppState>, Json(record): Json<CallRecord>) -> Response {
    match bounded(&state, state.repository.upsert(&record)).await {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => {
            error!(
                call_control_id = record.call_control_id,
                "failed to save call: {:#}", e
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save call recording")
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManualCallRequest {
    pub phone_number: String,
    /// Seconds.
    pub duration: u64,
    pub outcome: Option<String>,
    pub notes: Option<String>,
}

impl ManualCallRequest {
    /// A manually logged call is treated as a completed conversation ending `now`.
    pub fn to_record(
        &self,
        now: DateTime<Utc>,
        to_number: Option<&str>,
    ) -> Result<(CallRecord, Classification), String> {
        let phone = self.phone_number.trim();
        if phone.is_empty() {
            return Err("phoneNumber is required".to_string());
        }
        let classification = classifier::classify(self.duration, Some(NORMAL_HANGUP));
        let mut record = CallRecord::new(
            format!("manual-{}", now.timestamp_nanos_opt().unwrap_or_default()),
            phone,
            to_number.unwrap_or("Unknown"),
            CallDirection::Incoming,
            now - chrono::Duration::seconds(self.duration as i64),
        );
        record.end_time = Some(now);
        record.duration_seconds = self.duration as i64;
        record.status = self
            .outcome
            .clone()
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| "Follow Up".to_string());
        record.hangup_cause = Some(NORMAL_HANGUP.to_string());
        record.lead_quality = Some(classification.lead_quality);
        record.appointment_booked = classification.appointment_booked();
        record.follow_up_required = classification.follow_up_required();
        record.ai_summary = Some(
            self.notes
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Manually logged call".to_string()),
        );
        Ok((record, classification))
    }
}

pub async fn log_call(
    State(state): State<AppState>,
    Json(request): Json<ManualCallRequest>,
) -> Response {
    let to_number = state.config.telephony.phone_number.as_deref();
    let (record, classification) = match request.to_record(Utc::now(), to_number) {
        Ok(built) => built,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match bounded(&state, state.repository.upsert(&record)).await {
        Ok(saved) => {
            info!(
                call_control_id = %saved.call_control_id,
                duration_secs = saved.duration_seconds,
                interest = %classification.interest,
                "manual call logged"
            );
            Json(json!({
                "success": true,
                "callControlId": saved.call_control_id,
                "interest": classification.interest,
            }))
            .into_response()
        }
        Err(e) => {
            error!("failed to log call: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to log call")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::InterestLevel;

    #[test]
    fn test_history_query_all_means_unfiltered() {
        let query = HistoryQuery {
            direction: Some("all".to_string()),
            lead_quality: Some("All".to_string()),
            ..Default::default()
        };
        let filter = query.to_filter(Some("assistant-1")).unwrap();
        assert_eq!(filter.direction, None);
        assert_eq!(filter.lead_quality, None);
        assert_eq!(filter.assistant_id.as_deref(), Some("assistant-1"));
    }

    #[test]
    fn test_history_query_parses_values() {
        let query = HistoryQuery {
            direction: Some("inbound".to_string()),
            lead_quality: Some("Not Qualified".to_string()),
            has_recording: Some(true),
            limit: Some(20),
            ..Default::default()
        };
        let filter = query.to_filter(None).unwrap();
        assert_eq!(filter.direction, Some(CallDirection::Incoming));
        assert_eq!(filter.lead_quality, Some(LeadQuality::NotQualified));
        assert!(filter.has_recording);
        assert!(!filter.has_transcript);
        assert_eq!(filter.limit, Some(20));

        let bad = HistoryQuery {
            direction: Some("sideways".to_string()),
            ..Default::default()
        };
        assert!(bad.to_filter(None).is_err());
    }

    #[test]
    fn test_manual_call_record() {
        let now = Utc::now();
        let request = ManualCallRequest {
            phone_number: " +14035550123 ".to_string(),
            duration: 90,
            ..Default::default()
        };
        let (record, classification) = request.to_record(now, Some("+18255550100")).unwrap();
        assert!(record.call_control_id.starts_with("manual-"));
        assert_eq!(record.from_number, "+14035550123");
        assert_eq!(record.to_number, "+18255550100");
        assert_eq!(record.duration_seconds, 90);
        assert_eq!(record.end_time, Some(now));
        assert_eq!(record.start_time, now - chrono::Duration::seconds(90));
        assert_eq!(record.status, "Follow Up");
        assert_eq!(record.ai_summary.as_deref(), Some("Manually logged call"));
        assert_eq!(classification.interest, InterestLevel::Medium);
        assert_eq!(record.lead_quality, Some(LeadQuality::Warm));
        assert!(record.follow_up_required);

        let booked = ManualCallRequest {
            phone_number: "+14035550123".to_string(),
            duration: 200,
            outcome: Some("Booked".to_string()),
            notes: Some("Roof inspection Tuesday".to_string()),
        };
        let (record, classification) = booked.to_record(now, None).unwrap();
        assert_eq!(record.to_number, "Unknown");
        assert_eq!(record.status, "Booked");
        assert_eq!(record.ai_summary.as_deref(), Some("Roof inspection Tuesday"));
        assert_eq!(classification.interest, InterestLevel::High);
        assert!(record.appointment_booked);

        let missing = ManualCallRequest::default();
        assert!(missing.to_record(now, None).is_err());
    }
}
