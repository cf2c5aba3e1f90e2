use super::error_response;
use crate::app::AppState;
use crate::sync::{RecordingSyncJob, SyncError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

pub async fn sync_handler(State(state): State<AppState>) -> Response {
    let result = match state.telephony.clone() {
        Some(client) => {
            let telephony = &state.config.telephony;
            RecordingSyncJob::new(client, state.repository.clone(), state.scope.clone())
                .with_paging(telephony.page_size, telephony.max_pages)
                .with_storage_timeout(state.config.storage_timeout())
                .run()
                .await
        }
        None => Err(SyncError::NotConfigured),
    };

    match result {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!("recording sync failed: {}", e);
            let status = match e {
                SyncError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                SyncError::Listing { .. } => StatusCode::BAD_GATEWAY,
            };
            error_response(status, format!("Failed to sync from telephony provider: {}", e))
        }
    }
}
